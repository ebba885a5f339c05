//! # Game Client Library
//!
//! Client side of the relay protocol. It drives the join handshake and keeps
//! a mirror of every other player's last reported position. Rendering,
//! camera, animation and local physics live outside this crate; they feed
//! positions in through [`network::Client::emit_local_movement`] and react to
//! the [`session::SessionEvent`]s coming out of [`network::Client::next_event`].
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! Pure state, no I/O:
//! - Assigned identity and display name
//! - Remote players keyed by identity
//! - Tolerance for events that arrive out of order
//!
//! ### Network Module (`network`)
//! WebSocket connection to the relay:
//! - Lazy connect on join
//! - JSON frame encoding and decoding
//! - Feeding server events into the session
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use client::session::SessionEvent;
//! use shared::Position;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("ws://127.0.0.1:3000/ws");
//!     client.request_join("Alice").await?;
//!
//!     while let Some(event) = client.next_event().await? {
//!         if let SessionEvent::Joined { username, .. } = event {
//!             println!("Playing as {}", username);
//!             client.emit_local_movement(Position::new(0.0, 1.0, 2.0)).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod session;
