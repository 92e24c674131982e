//! Server-driven wanderers.
//!
//! An NPC has no owning participant and no input queue. Its brain picks a
//! random point within a radius of where it spawned, walks there at a fixed
//! speed and picks a new point on a timer. The result is replicated like any
//! other actor pose.

use glam::{Vec2, Vec3};
use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::math::{horizontal, look_rotation_flat};
use shared::{
    ActorId, ActorState, ConfigError, MotorState, PhysicsBody, ReplicatedValue, SimpleBody,
    NO_OWNER,
};

pub const DEFAULT_WANDER_SPEED: f32 = 2.0;
pub const DEFAULT_WANDER_RADIUS: f32 = 5.0;
/// Seconds after spawn before the first new target.
pub const DEFAULT_FIRST_RETARGET: f64 = 1.0;
pub const DEFAULT_RETARGET_INTERVAL: f64 = 3.0;
/// Closer than this to its target an NPC stands still.
pub const DEFAULT_ARRIVE_DISTANCE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WanderConfig {
    pub speed: f32,
    pub radius: f32,
    pub first_retarget: f64,
    pub retarget_interval: f64,
    pub arrive_distance: f32,
}

impl Default for WanderConfig {
    fn default() -> Self {
        Self {
            speed: DEFAULT_WANDER_SPEED,
            radius: DEFAULT_WANDER_RADIUS,
            first_retarget: DEFAULT_FIRST_RETARGET,
            retarget_interval: DEFAULT_RETARGET_INTERVAL,
            arrive_distance: DEFAULT_ARRIVE_DISTANCE,
        }
    }
}

impl WanderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("speed", self.speed),
            ("radius", self.radius),
            ("retarget_interval", self.retarget_interval as f32),
            ("arrive_distance", self.arrive_distance),
        ];
        for (name, value) in checks {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if !(self.first_retarget.is_finite() && self.first_retarget >= 0.0) {
            return Err(ConfigError::NotPositive {
                name: "first_retarget",
                value: self.first_retarget as f32,
            });
        }
        Ok(())
    }
}

/// Target selection and steering for one NPC.
#[derive(Debug, Clone)]
pub struct WanderBrain {
    config: WanderConfig,
    origin: Vec3,
    target: Vec3,
    next_retarget_at: f64,
    rng: StdRng,
}

impl WanderBrain {
    /// Picks the first target immediately. `seed` makes the walk repeatable.
    pub fn new(config: WanderConfig, origin: Vec3, seed: u64) -> Self {
        let mut brain = Self {
            config,
            origin,
            target: origin,
            next_retarget_at: config.first_retarget,
            rng: StdRng::seed_from_u64(seed),
        };
        brain.pick_target();
        brain
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    fn pick_target(&mut self) {
        let offset = self.random_in_unit_circle() * self.config.radius;
        self.target = self.origin + Vec3::new(offset.x, 0.0, offset.y);
    }

    fn random_in_unit_circle(&mut self) -> Vec2 {
        loop {
            let point = Vec2::new(
                self.rng.gen_range(-1.0..=1.0),
                self.rng.gen_range(-1.0..=1.0),
            );
            if point.length_squared() <= 1.0 {
                return point;
            }
        }
    }

    /// Sets the body's horizontal velocity for one tick at authority time
    /// `now`. Vertical velocity is left to gravity.
    pub fn steer<B: PhysicsBody + ?Sized>(&mut self, body: &mut B, now: f64) {
        if now >= self.next_retarget_at {
            self.pick_target();
            self.next_retarget_at += self.config.retarget_interval;
            trace!(
                "Wanderer retargeted to ({:.1}, {:.1})",
                self.target.x,
                self.target.z
            );
        }

        let to_target = horizontal(self.target - body.position());
        let mut velocity = body.velocity();
        if to_target.length() < self.config.arrive_distance {
            velocity.x = 0.0;
            velocity.z = 0.0;
        } else {
            let direction = to_target.normalize();
            velocity.x = direction.x * self.config.speed;
            velocity.z = direction.z * self.config.speed;
            body.set_rotation(look_rotation_flat(direction));
        }
        body.set_velocity(velocity);
    }
}

#[derive(Debug)]
pub struct Npc {
    pub id: ActorId,
    pub body: SimpleBody,
    pub brain: WanderBrain,
}

impl Npc {
    pub fn tick(&mut self, now: f64, dt: f32) {
        self.brain.steer(&mut self.body, now);
        self.body.integrate(dt);
    }

    pub fn state(&self) -> ActorState {
        ActorState {
            id: self.id,
            owner: NO_OWNER,
            position: self.body.position,
            rotation: self.body.rotation,
            velocity: self.body.velocity,
            grounded: self.body.grounded,
            motor: MotorState::default(),
            coins: ReplicatedValue::default(),
        }
    }
}
