use crate::math::finite_or_zero;
use crate::ParticipantId;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// One tick of movement intent from a participant.
///
/// `jump_requested` and `dive_requested` are edges: true only for the tick
/// the button went down. `camera_yaw` lets the authority rebuild the same
/// camera-relative basis the client moved with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    pub participant: ParticipantId,
    pub sequence: u32,
    pub timestamp: u64,
    pub move_input: Vec2,
    pub jump_requested: bool,
    pub jump_held: bool,
    pub dive_requested: bool,
    pub camera_yaw: f32,
}

impl InputCommand {
    pub fn idle(participant: ParticipantId, sequence: u32, timestamp: u64) -> Self {
        Self {
            participant,
            sequence,
            timestamp,
            move_input: Vec2::ZERO,
            jump_requested: false,
            jump_held: false,
            dive_requested: false,
            camera_yaw: 0.0,
        }
    }

    /// Same held state with the one-shot presses cleared.
    ///
    /// Used when a tick has no fresh command and the previous one is repeated.
    pub fn without_edges(&self) -> Self {
        Self {
            jump_requested: false,
            dive_requested: false,
            ..*self
        }
    }

    /// Clamps the move vector to unit length and scrubs non-finite values.
    pub fn sanitized(&self) -> Self {
        let move_input = clamp_move_input(Vec2::new(
            finite_or_zero(self.move_input.x),
            finite_or_zero(self.move_input.y),
        ));

        Self {
            move_input,
            camera_yaw: finite_or_zero(self.camera_yaw),
            ..*self
        }
    }
}

/// Normalizes a move vector only when it is longer than 1, so analog
/// partial deflection survives.
pub fn clamp_move_input(input: Vec2) -> Vec2 {
    if input.length_squared() > 1.0 {
        input.normalize()
    } else {
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_idle_command() {
        let command = InputCommand::idle(7, 3, 1000);
        assert_eq!(command.participant, 7);
        assert_eq!(command.sequence, 3);
        assert_eq!(command.move_input, Vec2::ZERO);
        assert!(!command.jump_requested);
    }

    #[test]
    fn test_without_edges_keeps_held_state() {
        let command = InputCommand {
            move_input: Vec2::new(1.0, 0.0),
            jump_requested: true,
            jump_held: true,
            dive_requested: true,
            ..InputCommand::idle(1, 1, 0)
        };

        let repeated = command.without_edges();
        assert!(!repeated.jump_requested);
        assert!(!repeated.dive_requested);
        assert!(repeated.jump_held);
        assert_eq!(repeated.move_input, command.move_input);
    }

    #[test]
    fn test_sanitized_clamps_and_scrubs() {
        let command = InputCommand {
            move_input: Vec2::new(3.0, 4.0),
            camera_yaw: f32::NAN,
            ..InputCommand::idle(1, 1, 0)
        };
        let clean = command.sanitized();
        assert_approx_eq!(clean.move_input.length(), 1.0, 1e-6);
        assert_eq!(clean.camera_yaw, 0.0);

        let nan = InputCommand {
            move_input: Vec2::new(f32::NAN, 0.5),
            ..InputCommand::idle(1, 1, 0)
        };
        assert_eq!(nan.sanitized().move_input, Vec2::new(0.0, 0.5));
    }

    #[test]
    fn test_partial_deflection_is_kept() {
        assert_eq!(clamp_move_input(Vec2::new(0.3, 0.4)), Vec2::new(0.3, 0.4));
    }
}
