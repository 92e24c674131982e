//! Server-side validation of everything a client asks for.
//!
//! Movement commands are never trusted as results: the authority sanitises
//! them and runs them through its own copy of the movement controller, so a
//! jump or dive only happens if the authoritative state allows it. Pickup
//! claims are checked against the authoritative actor position.

use glam::Vec3;
use log::debug;
use shared::movement::StepOutcome;
use shared::{
    CameraBasis, ConfigError, InputCommand, MotorState, MovementConfig, MovementSimulator,
    PhysicsBody, Pickup, Pose,
};

pub const DEFAULT_MAX_PICKUP_DISTANCE: f32 = 1.5;

/// Why a pickup claim was refused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PickupRejection {
    /// Already collected, or never existed.
    Missing,
    OutOfRange { distance: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthorityValidator {
    simulator: MovementSimulator,
    max_pickup_distance: f32,
}

impl AuthorityValidator {
    pub fn new(movement: MovementConfig, max_pickup_distance: f32) -> Self {
        Self {
            simulator: MovementSimulator::new(movement),
            max_pickup_distance,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulator.config.validate()?;
        if !(self.max_pickup_distance.is_finite() && self.max_pickup_distance > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "max_pickup_distance",
                value: self.max_pickup_distance,
            });
        }
        Ok(())
    }

    pub fn movement_config(&self) -> &MovementConfig {
        &self.simulator.config
    }

    pub fn max_pickup_distance(&self) -> f32 {
        self.max_pickup_distance
    }

    /// Sanitises `command` and advances the actor one tick.
    pub fn simulate<B: PhysicsBody + ?Sized>(
        &self,
        body: &mut B,
        motor: &mut MotorState,
        command: &InputCommand,
        dt: f32,
    ) -> (StepOutcome, Pose) {
        let command = command.sanitized();
        let camera = CameraBasis::from_yaw(command.camera_yaw);
        let (outcome, pose) = self.simulator.advance(body, motor, &command, &camera, dt);

        if outcome.dive_rejected {
            debug!(
                "Rejected dive from participant {} (input {})",
                command.participant, command.sequence
            );
        }
        if command.jump_requested && !outcome.jumped {
            debug!(
                "Jump from participant {} (input {}) buffered, not grounded",
                command.participant, command.sequence
            );
        }

        (outcome, pose)
    }

    /// Checks a claim against the authoritative actor position.
    pub fn check_pickup(
        &self,
        actor_position: Vec3,
        target: Option<&Pickup>,
    ) -> Result<(), PickupRejection> {
        let pickup = target.ok_or(PickupRejection::Missing)?;
        let distance = actor_position.distance(pickup.position);
        if distance > self.max_pickup_distance {
            return Err(PickupRejection::OutOfRange { distance });
        }
        Ok(())
    }
}

impl Default for AuthorityValidator {
    fn default() -> Self {
        Self::new(MovementConfig::default(), DEFAULT_MAX_PICKUP_DISTANCE)
    }
}
