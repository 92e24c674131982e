//! Error types shared by the server and client.
//!
//! Policy rejections (a refused jump, dive or pickup) are not errors: they
//! are silent no-ops. Only setup and misuse problems are modelled here.

use crate::ActorId;

/// Invalid tuning values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a finite number greater than zero (got {value})")]
    NotPositive { name: &'static str, value: f32 },

    #[error("{name} must be a finite number in [0, 1] (got {value})")]
    OutOfUnitRange { name: &'static str, value: f32 },

    #[error("{name} must be at least 1")]
    ZeroCapacity { name: &'static str },
}

/// Failures while bringing an actor into the simulation.
///
/// These are fatal to the affected actor only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SetupError {
    #[error("actor {actor} has invalid movement config: {source}")]
    InvalidConfig {
        actor: ActorId,
        #[source]
        source: ConfigError,
    },

    #[error("actor {0} already exists")]
    DuplicateActor(ActorId),

    #[error("level has no spawn points")]
    NoSpawnPoints,
}

/// Misuse of a replication channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    #[error("only the authority may write a replicated value")]
    NotAuthority,
}
