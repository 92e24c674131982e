//! # Coin Dash Server Library
//!
//! The authoritative half of the game. The server owns the only trusted copy
//! of every actor, runs the shared movement controller on each participant's
//! commands at a fixed tick, decides pickup claims and broadcasts the result.
//!
//! ## Authority
//!
//! Clients send *intent*, never results. Each command is sanitised and run
//! through the same [`shared::MovementSimulator`] the client predicts with,
//! so a jump or dive only happens if the server's own state allows it.
//! Pickup claims are checked against the authoritative position and the
//! first valid claim on a coin wins.
//!
//! ## Module Organization
//!
//! ### Authority Module (`authority`)
//! Command sanitisation, simulation and pickup validation.
//!
//! ### Input Queue Module (`input_queue`)
//! Per-actor ordering of commands that arrive out of order over UDP.
//!
//! ### Game Module (`game`)
//! The [`game::World`]: actors, pickups, the coin counters and the outbox
//! of packets each tick produces. Deterministic and socket-free.
//!
//! ### NPC Module (`npc`)
//! Server-driven wanderers that have no owning participant.
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking, player cap and timeouts.
//!
//! ### Network Module (`network`)
//! UDP socket tasks and the main `tokio::select!` loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // 50 Hz physics, at most 16 players
//!     let mut server = Server::new("127.0.0.1:8080", Duration::from_millis(20), 16).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The server runs these internal tasks:
//! - **Network Receiver**: decodes datagrams and forwards them to the main loop
//! - **Network Sender**: drains the outgoing packet queue
//! - **Timeout Checker**: drops clients that have gone quiet and tells them so
//! - **Main Loop**: feeds packets to the world and ticks it

pub mod authority;
pub mod client_manager;
pub mod game;
pub mod input_queue;
pub mod network;
pub mod npc;
