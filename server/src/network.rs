//! Server network layer: WebSocket transport and static bundle serving

use crate::relay::{Relay, RelayEvent};
use crate::registry::SessionRegistry;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientMessage, PlayerId, WEBSOCKET_PATH};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

/// Handles shared by every connection task
#[derive(Clone)]
struct ConnectionContext {
    events: mpsc::UnboundedSender<RelayEvent>,
    next_id: Arc<AtomicU32>,
}

impl ConnectionContext {
    fn allocate_id(&self) -> PlayerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Relay server bound to a TCP port
pub struct Server {
    listener: TcpListener,
    public_dir: PathBuf,
    registry: SessionRegistry,
}

impl Server {
    pub async fn bind(addr: &str, public_dir: impl AsRef<Path>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            public_dir: public_dir.as_ref().to_path_buf(),
            registry: SessionRegistry::new(),
        })
    }

    /// Replaces the registry the relay will start with
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the relay loop and serves connections until the listener fails
    pub async fn run(self) -> io::Result<()> {
        let (events, event_rx) = mpsc::unbounded_channel();
        let relay = Relay::with_registry(self.registry, event_rx);
        let relay_handle = tokio::spawn(relay.run());

        let context = ConnectionContext {
            events: events.clone(),
            next_id: Arc::new(AtomicU32::new(1)),
        };
        let app = router(context, &self.public_dir);

        info!(
            "Serving client bundle from {}",
            self.public_dir.display()
        );
        let result = axum::serve(self.listener, app).await;

        shutdown_relay(&events, relay_handle).await;
        result
    }
}

/// Asks the relay to stop and waits for it, logging a relay that panicked
async fn shutdown_relay(events: &mpsc::UnboundedSender<RelayEvent>, relay: JoinHandle<()>) {
    if events.send(RelayEvent::Shutdown).is_err() {
        debug!("Relay already stopped before shutdown");
    }
    if let Err(e) = relay.await {
        error!("Relay task failed: {}", e);
    }
}

fn router(context: ConnectionContext, public_dir: &Path) -> Router {
    Router::new()
        .route(WEBSOCKET_PATH, get(upgrade))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(context)
}

async fn upgrade(ws: WebSocketUpgrade, State(context): State<ConnectionContext>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, context))
}

/// Drives one connection from upgrade to close
///
/// The reader half forwards parsed events to the relay. A writer task owns
/// the sink and drains this connection's outbox in order.
async fn handle_socket(socket: WebSocket, context: ConnectionContext) {
    let id = context.allocate_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<String>();

    info!("a user connected: {}", id);
    if let Err(e) = context.events.send(RelayEvent::Connected { id, outbox }) {
        error!("Failed to register connection {}: {}", id, e);
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(frame)).await {
                debug!("Write to connection {} failed: {}", id, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientMessage::from_json(&text) {
                Ok(message) => {
                    if let Err(e) = context.events.send(RelayEvent::Received { id, message }) {
                        error!("Failed to forward message from {}: {}", id, e);
                        break;
                    }
                }
                Err(e) => warn!("Malformed frame from connection {}: {}", id, e),
            },
            Ok(Message::Binary(_)) => warn!("Ignoring binary frame from connection {}", id),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Connection {} errored: {}", id, e);
                break;
            }
        }
    }

    info!("user disconnected: {}", id);
    if let Err(e) = context.events.send(RelayEvent::Disconnected { id }) {
        error!("Failed to report disconnect of {}: {}", id, e);
        writer.abort();
        return;
    }
    let _ = writer.await;
}
