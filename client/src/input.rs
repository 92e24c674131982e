//! Client input sampling with sequencing and edge detection

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::input::clamp_move_input;
use shared::math::finite_or_zero;
use shared::{InputCommand, ParticipantId};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Raw device state for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawInput {
    pub move_axes: Vec2,
    pub jump_down: bool,
    pub dive_down: bool,
    pub camera_yaw: f32,
}

/// Anything that can be polled for a [`RawInput`] once per frame.
pub trait InputDevice {
    fn sample(&mut self) -> RawInput;
}

/// Turns per-frame device state into per-tick [`InputCommand`]s.
///
/// Render frames and physics ticks run at different rates. Button edges seen
/// on any frame are latched until the next physics tick takes a command, so
/// a tap that starts and ends between two ticks still registers.
#[derive(Debug)]
pub struct InputSampler {
    participant: ParticipantId,
    next_sequence: u32,
    latest: RawInput,

    // Previous frame button states for edge detection
    prev_jump: bool,
    prev_dive: bool,

    jump_latched: bool,
    dive_latched: bool,
}

impl InputSampler {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            next_sequence: 1,
            latest: RawInput::default(),
            prev_jump: false,
            prev_dive: false,
            jump_latched: false,
            dive_latched: false,
        }
    }

    pub fn set_participant(&mut self, participant: ParticipantId) {
        self.participant = participant;
    }

    /// Polls `device` for this frame.
    pub fn sample_frame(&mut self, device: &mut dyn InputDevice) {
        let raw = device.sample();
        self.record(raw);
    }

    /// Feeds one frame of raw state.
    pub fn record(&mut self, raw: RawInput) {
        if raw.jump_down && !self.prev_jump {
            self.jump_latched = true;
        }
        if raw.dive_down && !self.prev_dive {
            self.dive_latched = true;
        }

        self.prev_jump = raw.jump_down;
        self.prev_dive = raw.dive_down;
        self.latest = raw;
    }

    /// Builds the command for the next physics tick and clears the latches.
    pub fn take_command(&mut self, timestamp: u64) -> InputCommand {
        let axes = Vec2::new(
            finite_or_zero(self.latest.move_axes.x),
            finite_or_zero(self.latest.move_axes.y),
        );

        let command = InputCommand {
            participant: self.participant,
            sequence: self.next_sequence,
            timestamp,
            move_input: clamp_move_input(axes),
            jump_requested: self.jump_latched,
            jump_held: self.latest.jump_down,
            dive_requested: self.dive_latched,
            camera_yaw: finite_or_zero(self.latest.camera_yaw),
        };

        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.jump_latched = false;
        self.dive_latched = false;
        command
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }
}

/// Wall-clock milliseconds, used to stamp outgoing commands.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// A bot that wanders around, hopping and diving now and then.
///
/// Seeded, so two bots with the same seed press the same buttons.
pub struct ScriptedDevice {
    rng: StdRng,
    axes: Vec2,
    yaw: f32,
    frames_until_turn: u32,
    jump_frames: u32,
    dive_frames: u32,
    jump_chance: f64,
    dive_chance: f64,
}

impl ScriptedDevice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            axes: Vec2::new(0.0, 1.0),
            yaw: 0.0,
            frames_until_turn: 0,
            jump_frames: 0,
            dive_frames: 0,
            jump_chance: 0.02,
            dive_chance: 0.2,
        }
    }

    fn pick_direction(&mut self) {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let magnitude = self.rng.gen_range(0.5..=1.0);
        self.axes = Vec2::from_angle(angle) * magnitude;
        self.yaw = self.rng.gen_range(-0.5..0.5);
        self.frames_until_turn = self.rng.gen_range(30..120);
    }
}

impl InputDevice for ScriptedDevice {
    fn sample(&mut self) -> RawInput {
        if self.frames_until_turn == 0 {
            self.pick_direction();
        }
        self.frames_until_turn -= 1;

        let was_jumping = self.jump_frames > 0;
        if self.jump_frames > 0 {
            self.jump_frames -= 1;
        } else if self.rng.gen_bool(self.jump_chance) {
            self.jump_frames = self.rng.gen_range(3..20);
        }

        // Dive shortly after a jump, while still in the air
        if self.dive_frames > 0 {
            self.dive_frames -= 1;
        } else if was_jumping && self.jump_frames == 0 && self.rng.gen_bool(self.dive_chance) {
            self.dive_frames = 2;
        }

        RawInput {
            move_axes: self.axes,
            jump_down: self.jump_frames > 0,
            dive_down: self.dive_frames > 0,
            camera_yaw: self.yaw,
        }
    }
}
