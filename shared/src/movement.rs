//! Per-tick movement controller shared by client prediction and the authority.
//!
//! The same [`MovementSimulator::step`] runs on the owning client (to make
//! input feel immediate) and on the server (where its result is the truth).
//! Everything it needs is passed in: the body, the actor's motor state, the
//! command for this tick, the camera basis and the tick length. Given equal
//! inputs it produces bit-identical outputs.

use crate::actor::{MovementState, Pose};
use crate::error::ConfigError;
use crate::input::InputCommand;
use crate::math::{horizontal, look_rotation_flat, move_towards, rotate_towards};
use crate::physics::PhysicsBody;
use crate::GRAVITY;
use glam::Vec3;
use log::trace;
use serde::{Deserialize, Serialize};

/// Squared length below which a move input counts as "no input".
pub const MOVE_INPUT_EPSILON: f32 = 0.001;

/// Squared horizontal speed below which facing is left alone.
pub const FACING_SPEED_EPSILON: f32 = 0.01;

/// Downward bias mixed into the dive direction.
pub const DIVE_DOWNWARD_BIAS: f32 = 0.3;

/// Tuning values for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    pub max_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    /// Multiplier (< 1) on acceleration/deceleration while airborne.
    pub air_control: f32,
    /// Degrees per second.
    pub rotation_speed: f32,
    pub jump_force: f32,
    pub jump_buffer_time: f64,
    pub coyote_time: f64,
    pub dive_force: f32,
    pub dive_torque: f32,
    pub dive_cooldown: f64,
    pub fall_multiplier: f32,
    pub low_jump_multiplier: f32,
    pub gravity: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_speed: 8.0,
            acceleration: 50.0,
            deceleration: 40.0,
            air_control: 0.4,
            rotation_speed: 720.0,
            jump_force: 8.0,
            jump_buffer_time: 0.15,
            coyote_time: 0.1,
            dive_force: 12.0,
            dive_torque: 5.0,
            dive_cooldown: 1.0,
            fall_multiplier: 2.5,
            low_jump_multiplier: 2.0,
            gravity: GRAVITY,
        }
    }
}

impl MovementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("max_speed", self.max_speed)?;
        positive("acceleration", self.acceleration)?;
        positive("deceleration", self.deceleration)?;
        positive("rotation_speed", self.rotation_speed)?;
        positive("jump_force", self.jump_force)?;
        positive("jump_buffer_time", self.jump_buffer_time as f32)?;
        positive("coyote_time", self.coyote_time as f32)?;
        positive("dive_force", self.dive_force)?;
        positive("dive_cooldown", self.dive_cooldown as f32)?;
        positive("fall_multiplier", self.fall_multiplier)?;
        positive("low_jump_multiplier", self.low_jump_multiplier)?;

        if !(self.air_control.is_finite() && (0.0..=1.0).contains(&self.air_control)) {
            return Err(ConfigError::OutOfUnitRange {
                name: "air_control",
                value: self.air_control,
            });
        }
        if !self.gravity.is_finite() || self.gravity >= 0.0 {
            return Err(ConfigError::NotPositive {
                name: "-gravity",
                value: -self.gravity,
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

/// Remembers a jump press so it can fire on a later tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JumpBuffer {
    pressed_at: Option<f64>,
}

impl JumpBuffer {
    pub fn press(&mut self, now: f64) {
        self.pressed_at = Some(now);
    }

    pub fn is_active(&self, now: f64, window: f64) -> bool {
        self.pressed_at.is_some_and(|pressed| now - pressed <= window)
    }

    /// Drops a press older than `window`. Returns true if one was dropped.
    pub fn expire(&mut self, now: f64, window: f64) -> bool {
        if self.pressed_at.is_some() && !self.is_active(now, window) {
            self.pressed_at = None;
            return true;
        }
        false
    }

    pub fn consume(&mut self) {
        self.pressed_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.pressed_at.is_some()
    }
}

/// Dive cooldown: `Idle -> OnCooldown(start) -> Idle` once `now > start + cooldown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum DiveCooldown {
    #[default]
    Idle,
    OnCooldown {
        started_at: f64,
    },
}

impl DiveCooldown {
    pub fn is_ready(&self, now: f64, cooldown: f64) -> bool {
        match *self {
            DiveCooldown::Idle => true,
            DiveCooldown::OnCooldown { started_at } => now > started_at + cooldown,
        }
    }

    pub fn start(&mut self, now: f64) {
        *self = DiveCooldown::OnCooldown { started_at: now };
    }

    pub fn refresh(&mut self, now: f64, cooldown: f64) {
        if matches!(self, DiveCooldown::OnCooldown { .. }) && self.is_ready(now, cooldown) {
            *self = DiveCooldown::Idle;
        }
    }
}

/// Controller state that lives alongside the physics body.
///
/// `clock` is the actor's own simulated time; every timestamp in here is
/// measured on it, so the state can be copied between processes and
/// replayed without any wall-clock dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub clock: f64,
    pub jump_buffer: JumpBuffer,
    pub last_grounded_at: Option<f64>,
    pub dive: DiveCooldown,
    pub diving: bool,
    pub jump_held: bool,
}

/// Ground-plane basis the move input is expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBasis {
    pub forward: Vec3,
    pub right: Vec3,
}

impl CameraBasis {
    pub fn from_yaw(yaw: f32) -> Self {
        let (sin, cos) = yaw.sin_cos();
        Self {
            forward: Vec3::new(sin, 0.0, cos),
            right: Vec3::new(cos, 0.0, -sin),
        }
    }

    /// Projects arbitrary camera vectors onto the ground plane.
    pub fn from_vectors(forward: Vec3, right: Vec3) -> Self {
        let forward = horizontal(forward).normalize_or_zero();
        let right = horizontal(right).normalize_or_zero();
        if forward == Vec3::ZERO || right == Vec3::ZERO {
            return Self::default();
        }
        Self { forward, right }
    }

    pub fn yaw(&self) -> f32 {
        self.forward.x.atan2(self.forward.z)
    }
}

impl Default for CameraBasis {
    fn default() -> Self {
        Self {
            forward: Vec3::Z,
            right: Vec3::X,
        }
    }
}

/// What happened during one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub jumped: bool,
    pub dived: bool,
    pub dive_rejected: bool,
    pub jump_buffer_expired: bool,
    pub state: MovementState,
}

/// Converts intent plus physical state into velocity changes for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MovementSimulator {
    pub config: MovementConfig,
}

impl MovementSimulator {
    pub fn new(config: MovementConfig) -> Self {
        Self { config }
    }

    /// Runs the controller for one tick. Does not integrate the body.
    pub fn step<B: PhysicsBody + ?Sized>(
        &self,
        body: &mut B,
        motor: &mut MotorState,
        command: &InputCommand,
        camera: &CameraBasis,
        dt: f32,
    ) -> StepOutcome {
        let config = &self.config;
        let now = motor.clock;
        let grounded = body.is_grounded();

        if grounded {
            motor.last_grounded_at = Some(now);
            motor.diving = false;
        }
        motor.dive.refresh(now, config.dive_cooldown);
        motor.jump_held = command.jump_held;

        if command.jump_requested {
            motor.jump_buffer.press(now);
        }
        let jump_buffer_expired = motor.jump_buffer.expire(now, config.jump_buffer_time);
        if jump_buffer_expired {
            trace!("Jump buffer expired at t={:.3}", now);
        }

        let jumped = self.can_jump(motor, grounded);
        if jumped {
            self.perform_jump(body, motor);
        }

        let mut dived = false;
        let mut dive_rejected = false;
        if command.dive_requested {
            if self.can_dive(motor, grounded) {
                self.perform_dive(body, motor);
                dived = true;
            } else {
                dive_rejected = true;
            }
        }

        let direction = self.move_direction(command, camera);
        self.apply_movement(body, direction, grounded, dt);
        self.apply_rotation(body, motor, dt);
        self.apply_fall_shaping(body, motor, dt);

        motor.clock += dt as f64;

        StepOutcome {
            jumped,
            dived,
            dive_rejected,
            jump_buffer_expired,
            state: MovementState::from_flags(grounded && !jumped, motor.diving),
        }
    }

    /// Step followed by integration of the body.
    pub fn advance<B: PhysicsBody + ?Sized>(
        &self,
        body: &mut B,
        motor: &mut MotorState,
        command: &InputCommand,
        camera: &CameraBasis,
        dt: f32,
    ) -> (StepOutcome, Pose) {
        let outcome = self.step(body, motor, command, camera, dt);
        let pose = body.integrate(dt);
        (outcome, pose)
    }

    /// Buffered press plus ground contact now or within the coyote window.
    pub fn can_jump(&self, motor: &MotorState, grounded: bool) -> bool {
        let now = motor.clock;
        let recently_grounded = motor
            .last_grounded_at
            .is_some_and(|at| now - at < self.config.coyote_time);

        motor.jump_buffer.is_active(now, self.config.jump_buffer_time)
            && (grounded || recently_grounded)
    }

    pub fn can_dive(&self, motor: &MotorState, grounded: bool) -> bool {
        !grounded && !motor.diving && motor.dive.is_ready(motor.clock, self.config.dive_cooldown)
    }

    /// Camera-relative world direction for the command's move input.
    pub fn move_direction(&self, command: &InputCommand, camera: &CameraBasis) -> Vec3 {
        let input = command.move_input;
        if input.length_squared() <= MOVE_INPUT_EPSILON {
            return Vec3::ZERO;
        }

        let direction = camera.forward * input.y + camera.right * input.x;
        if direction.length_squared() > 1.0 {
            direction.normalize()
        } else {
            direction
        }
    }

    fn perform_jump<B: PhysicsBody + ?Sized>(&self, body: &mut B, motor: &mut MotorState) {
        let velocity = body.velocity();
        body.set_velocity(Vec3::new(velocity.x, 0.0, velocity.z));
        body.apply_impulse(Vec3::Y * self.config.jump_force);

        motor.jump_buffer.consume();
        // One grace window, one jump.
        motor.last_grounded_at = None;
    }

    fn perform_dive<B: PhysicsBody + ?Sized>(&self, body: &mut B, motor: &mut MotorState) {
        motor.diving = true;
        motor.dive.start(motor.clock);

        let rotation = body.rotation();
        let forward = rotation * Vec3::Z;
        let direction = (forward + Vec3::NEG_Y * DIVE_DOWNWARD_BIAS).normalize();

        body.set_velocity(Vec3::ZERO);
        body.apply_impulse(direction * self.config.dive_force);
        body.apply_torque_impulse(rotation * Vec3::X * self.config.dive_torque);
    }

    /// Rate-limited approach of horizontal velocity toward the input target.
    fn apply_movement<B: PhysicsBody + ?Sized>(
        &self,
        body: &mut B,
        direction: Vec3,
        grounded: bool,
        dt: f32,
    ) {
        let config = &self.config;
        let target = direction * config.max_speed;

        let mut rate = if direction.length_squared() > MOVE_INPUT_EPSILON {
            config.acceleration
        } else {
            config.deceleration
        };
        if !grounded {
            rate *= config.air_control;
        }

        let velocity = body.velocity();
        let new_horizontal = move_towards(horizontal(velocity), target, rate * dt);
        body.set_velocity(Vec3::new(new_horizontal.x, velocity.y, new_horizontal.z));
    }

    fn apply_rotation<B: PhysicsBody + ?Sized>(&self, body: &mut B, motor: &MotorState, dt: f32) {
        if motor.diving {
            return;
        }

        let horizontal_velocity = horizontal(body.velocity());
        if horizontal_velocity.length_squared() < FACING_SPEED_EPSILON {
            return;
        }

        let target = look_rotation_flat(horizontal_velocity);
        let max_radians = self.config.rotation_speed.to_radians() * dt;
        body.set_rotation(rotate_towards(body.rotation(), target, max_radians));
    }

    /// Heavier fall, and a shorter hop when the jump button is released early.
    fn apply_fall_shaping<B: PhysicsBody + ?Sized>(
        &self,
        body: &mut B,
        motor: &MotorState,
        dt: f32,
    ) {
        let config = &self.config;
        let mut velocity = body.velocity();

        if velocity.y < 0.0 {
            velocity.y += config.gravity * (config.fall_multiplier - 1.0) * dt;
        } else if velocity.y > 0.0 && !motor.jump_held {
            velocity.y += config.gravity * (config.low_jump_multiplier - 1.0) * dt;
        } else {
            return;
        }

        body.set_velocity(velocity);
    }
}
