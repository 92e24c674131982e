//! # Coin Dash Client Library
//!
//! The client half of the game. It never decides anything: it predicts its
//! own actor, shows everybody else slightly in the past, and mirrors the
//! counters the server owns.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Commands are applied to a local copy of the actor immediately, using the
//! same movement controller the server runs, so input never waits for a
//! round trip.
//!
//! ### Server Reconciliation
//! Every world state acknowledges the newest command the server consumed.
//! If the authoritative position differs from what was predicted for that
//! command, the local actor is rewound and the unacknowledged commands are
//! replayed on top.
//!
//! ### Entity Interpolation
//! Remote actors are rendered a fixed delay behind the estimated server
//! clock, between two buffered snapshots, with exponential smoothing on top.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! [`game::ClientGameState`]: prediction, reconciliation, remote actors,
//! replicated coins, pickup claims and the server clock estimate.
//!
//! ### Input Module (`input`)
//! Edge detection and latching of device input into per-tick commands, plus
//! a seeded bot device for headless runs.
//!
//! ### Interpolation Module (`interpolation`)
//! The per-actor snapshot buffer.
//!
//! ### Network Module (`network`)
//! UDP socket handling and the `tokio::select!` loop driving everything.
//!
//! ## Usage Example
//!
//! ```rust
//! use client::game::ClientGameState;
//! use client::input::InputSampler;
//! use shared::{Packet, Pose};
//!
//! let mut game = ClientGameState::default();
//! let mut sampler = InputSampler::new(1);
//!
//! // Server packets go straight in
//! game.apply_packet(Packet::Connected { client_id: 1, actor_id: 1 }, 0.0);
//!
//! // Once per physics tick: predict and collect pickups to claim
//! let command = sampler.take_command(0);
//! let _claims = game.physics_tick(&command, 0.02);
//!
//! // Once per frame
//! let frame = game.render(0.02, 1.0 / 60.0);
//! let _poses: Vec<Pose> = frame.remotes.iter().map(|(_, pose)| *pose).collect();
//! ```

pub mod game;
pub mod input;
pub mod interpolation;
pub mod network;
