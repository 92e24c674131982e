//! Actor data model: poses, snapshots and the replicated actor state.

use crate::movement::{MotorState, StepOutcome};
use crate::replication::ReplicatedValue;
use crate::{ActorId, EntityId, ParticipantId};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Linear position / spherical rotation blend between two poses.
    pub fn blend(&self, other: &Pose, t: f32) -> Pose {
        Pose {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.slerp(other.rotation, t).normalize(),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// A timestamped pose received for one remote actor.
///
/// `timestamp` is authority time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: f64,
    pub position: Vec3,
    pub rotation: Quat,
}

impl Snapshot {
    pub fn new(timestamp: f64, position: Vec3, rotation: Quat) -> Self {
        Self {
            timestamp,
            position,
            rotation,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }
}

/// Derived movement state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementState {
    Grounded,
    Airborne,
    Diving,
}

impl MovementState {
    /// Contact wins over diving: landing always ends a dive.
    pub fn from_flags(grounded: bool, diving: bool) -> Self {
        if grounded {
            MovementState::Grounded
        } else if diving {
            MovementState::Diving
        } else {
            MovementState::Airborne
        }
    }
}

/// Full authoritative state of one actor as sent on the wire.
///
/// The motor state rides along so the owning client can rewind its
/// prediction to exactly what the authority simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: ActorId,
    pub owner: ParticipantId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub grounded: bool,
    pub motor: MotorState,
    pub coins: ReplicatedValue<u32>,
}

impl ActorState {
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    pub fn diving(&self) -> bool {
        self.motor.diving
    }

    pub fn movement_state(&self) -> MovementState {
        MovementState::from_flags(self.grounded, self.motor.diving)
    }
}

/// A one-shot movement event the authority relays to everyone but the
/// actor's owner, who already saw it through prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorEvent {
    Jumped,
    Dived,
}

impl ActorEvent {
    /// Events produced by one controller step, jump first.
    pub fn from_outcome(outcome: &StepOutcome) -> Vec<ActorEvent> {
        let mut events = Vec::new();
        if outcome.jumped {
            events.push(ActorEvent::Jumped);
        }
        if outcome.dived {
            events.push(ActorEvent::Dived);
        }
        events
    }
}

/// A collectible coin held in authoritative state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pickup {
    pub id: EntityId,
    pub position: Vec3,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_movement_state_from_flags() {
        assert_eq!(MovementState::from_flags(true, false), MovementState::Grounded);
        assert_eq!(MovementState::from_flags(true, true), MovementState::Grounded);
        assert_eq!(MovementState::from_flags(false, false), MovementState::Airborne);
        assert_eq!(MovementState::from_flags(false, true), MovementState::Diving);
    }

    #[test]
    fn test_actor_events_from_outcome() {
        let idle = StepOutcome {
            jumped: false,
            dived: false,
            dive_rejected: true,
            jump_buffer_expired: false,
            state: MovementState::Airborne,
        };
        assert!(ActorEvent::from_outcome(&idle).is_empty());

        let both = StepOutcome {
            jumped: true,
            dived: true,
            ..idle
        };
        assert_eq!(
            ActorEvent::from_outcome(&both),
            vec![ActorEvent::Jumped, ActorEvent::Dived]
        );
    }

    #[test]
    fn test_pose_blend_midpoint() {
        let a = Pose::new(Vec3::ZERO, Quat::IDENTITY);
        let b = Pose::new(Vec3::new(2.0, 0.0, 4.0), Quat::from_rotation_y(1.0));
        let mid = a.blend(&b, 0.5);

        assert_approx_eq!(mid.position.x, 1.0);
        assert_approx_eq!(mid.position.z, 2.0);
        assert_approx_eq!(mid.rotation.angle_between(Quat::IDENTITY), 0.5, 1e-4);
    }

    #[test]
    fn test_snapshot_pose() {
        let snapshot = Snapshot::new(1.5, Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        assert_eq!(snapshot.pose().position, Vec3::new(1.0, 2.0, 3.0));
    }
}
