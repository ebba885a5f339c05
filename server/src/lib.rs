//! # Relay Server Library
//!
//! This library provides the relay server for the multiplayer parkour game.
//! The server does not simulate anything: it keeps one record per joined
//! player, hands out unique display names, and forwards position updates
//! from each client to every other client.
//!
//! ## Core Responsibilities
//!
//! ### Session Management
//! Handles the lifecycle of a player session:
//! - Identity assignment when a WebSocket connection opens
//! - Join handshake with display name de-duplication
//! - Roster snapshot for the joining client
//! - Cleanup and notification when a connection closes
//!
//! ### Relay
//! Every movement update from a joined client is written into its record and
//! forwarded verbatim to all other joined clients. Positions are trusted as
//! sent; there is no validation, rate limiting or echo to the sender.
//!
//! ## Architecture Design
//!
//! ### Single-Consumer Event Loop
//! Connection tasks only parse frames and push events onto one channel. A
//! single relay task owns every player record and handles events one at a
//! time, so all clients observe the same order of joins, moves and leaves
//! without any locking.
//!
//! ### Per-Connection Writers
//! Each connection has an unbounded outbound queue drained by its own writer
//! task. The relay never waits on a socket; a slow client only delays itself.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Player records and the name de-duplication rule. Pure state, no I/O.
//!
//! ### Relay Module (`relay`)
//! The event loop: join, move and leave handling plus fan-out.
//!
//! ### Network Module (`network`)
//! Axum router with the WebSocket endpoint and static file fallback.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:3000", "public").await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod registry;
pub mod relay;
