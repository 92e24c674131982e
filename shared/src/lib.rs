//! Types and simulation code shared by the coin-dash server and client.
//!
//! The movement controller in [`movement`] is deterministic and runs on both
//! sides: the client predicts with it, the server decides with it. Everything
//! that crosses the network lives in [`protocol`].

pub mod actor;
pub mod error;
pub mod input;
pub mod lifecycle;
pub mod math;
pub mod movement;
pub mod physics;
pub mod protocol;
pub mod replication;

pub use actor::{ActorEvent, ActorState, MovementState, Pickup, Pose, Snapshot};
pub use error::{ConfigError, ReplicationError, SetupError};
pub use input::InputCommand;
pub use movement::{CameraBasis, MotorState, MovementConfig, MovementSimulator, StepOutcome};
pub use physics::{Level, PhysicsBody, SimpleBody};
pub use protocol::{ChunkInfo, Packet};
pub use replication::{ReplicatedValue, ReplicationChannel, ReplicationUpdate};

pub type ParticipantId = u32;
pub type ActorId = u32;
pub type EntityId = u32;

/// Owner of actors the server drives itself. Participant ids start at 1.
pub const NO_OWNER: ParticipantId = 0;

pub const GRAVITY: f32 = -9.81;

/// Fixed physics ticks per second.
pub const PHYSICS_TICK_RATE: u32 = 50;
pub const DEFAULT_RENDER_RATE: u32 = 60;

pub fn physics_dt(tick_rate: u32) -> f32 {
    1.0 / tick_rate.max(1) as f32
}
