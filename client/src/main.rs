use clap::Parser;
use client::network::Client;
use client::session::SessionEvent;
use log::{error, info};
use shared::Position;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay WebSocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000/ws")]
    server: String,

    /// Display name to request; the server may append a suffix
    #[arg(short = 'n', long, default_value = "Bot")]
    name: String,

    /// Movement updates per second
    #[arg(short = 'r', long, default_value = "20")]
    rate: u32,

    /// Radius of the circle the bot runs around
    #[arg(long, default_value = "5.0")]
    radius: f64,

    /// Leave after this many seconds instead of running until Ctrl+C
    #[arg(long)]
    duration: Option<u64>,
}

/// Point on the wander circle after `elapsed` seconds, one lap per 10s
fn wander_position(radius: f64, elapsed: f64) -> Position {
    let angle = elapsed * std::f64::consts::TAU / 10.0;
    Position::new(radius * angle.cos(), 1.0, radius * angle.sin())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client = Client::new(args.server.as_str());
    client.request_join(&args.name).await?;

    let mut movement_interval = interval(Duration::from_secs_f64(1.0 / args.rate.max(1) as f64));
    movement_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let deadline = args.duration.map(Duration::from_secs);

    loop {
        tokio::select! {
            event = client.next_event() => {
                match event? {
                    Some(SessionEvent::Joined { id, username, remote_ids, .. }) => {
                        info!("Joined as {} (id {}), {} other players", username, id, remote_ids.len());
                    }
                    Some(SessionEvent::PlayerArrived { id }) => {
                        if let Some(player) = client.session().remote_player(id) {
                            info!("{} arrived", player.username);
                        }
                    }
                    Some(SessionEvent::PlayerLeft { username, .. }) => {
                        info!("{} left", username);
                    }
                    Some(SessionEvent::PlayerMoved { .. }) => {}
                    None => {
                        info!("Connection closed by server");
                        break;
                    }
                }
            },

            _ = movement_interval.tick() => {
                if deadline.is_some_and(|limit| started.elapsed() >= limit) {
                    break;
                }
                if client.session().is_active() {
                    let position = wander_position(args.radius, started.elapsed().as_secs_f64());
                    if let Err(e) = client.emit_local_movement(position).await {
                        error!("Error sending movement: {}", e);
                        break;
                    }
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving...");
                break;
            }
        }
    }

    client.disconnect().await?;

    Ok(())
}
