//! Physics body abstraction and the reference body used by both server and client.
//!
//! The movement controller only ever talks to a [`PhysicsBody`]. The
//! [`SimpleBody`] implementation is a point mass with gravity that collides
//! against the static axis-aligned platforms of a [`Level`].

use crate::actor::Pose;
use crate::GRAVITY;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Distance below which a body resting on a platform counts as grounded.
pub const GROUND_TOLERANCE: f32 = 0.1;

/// Half extents of an actor's collision box.
pub const ACTOR_HALF_EXTENTS: Vec3 = Vec3::new(0.5, 1.0, 0.5);

/// Narrow interface the movement simulator drives.
pub trait PhysicsBody {
    fn position(&self) -> Vec3;
    fn rotation(&self) -> Quat;
    fn set_rotation(&mut self, rotation: Quat);
    fn velocity(&self) -> Vec3;
    fn set_velocity(&mut self, velocity: Vec3);
    /// Instantaneous change of momentum.
    fn apply_impulse(&mut self, impulse: Vec3);
    /// Instantaneous change of angular momentum.
    fn apply_torque_impulse(&mut self, torque: Vec3);
    /// Whether the body touched ground during the last integration.
    fn is_grounded(&self) -> bool;
    /// Advances the body by `dt` seconds and returns the resulting pose.
    fn integrate(&mut self, dt: f32) -> Pose;

    fn pose(&self) -> Pose {
        Pose::new(self.position(), self.rotation())
    }
}

/// A static axis-aligned box. `center` is the positional center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Platform {
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            center,
            half_extents,
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    pub fn top(&self) -> f32 {
        self.center.y + self.half_extents.y
    }
}

/// Static world geometry plus the points the authority spawns things at.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub platforms: Vec<Platform>,
    pub spawn_points: Vec<Vec3>,
    pub pickup_points: Vec<Vec3>,
    /// Where server-driven wanderers start. Each wanders around its point.
    pub npc_points: Vec<Vec3>,
}

impl Level {
    /// A large floor with a few raised platforms and a coin on each tile.
    pub fn arena() -> Self {
        let floor = Platform::new(Vec3::new(0.0, -0.5, 0.0), Vec3::new(100.0, 0.5, 100.0));
        let tiles = [
            Vec3::new(6.0, 0.5, 6.0),
            Vec3::new(-6.0, 1.0, 6.0),
            Vec3::new(6.0, 1.5, -6.0),
            Vec3::new(-6.0, 2.0, -6.0),
        ];

        let mut platforms = vec![floor];
        let mut pickup_points = Vec::new();
        for tile in tiles {
            let platform = Platform::new(tile, Vec3::new(2.0, 0.5, 2.0));
            pickup_points.push(Vec3::new(tile.x, platform.top() + 1.0, tile.z));
            platforms.push(platform);
        }

        pickup_points.extend([
            Vec3::new(0.0, 1.0, 3.0),
            Vec3::new(3.0, 1.0, 0.0),
            Vec3::new(-3.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, -3.0),
        ]);

        let spawn_points = vec![
            Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 0.0),
            Vec3::new(10.0, ACTOR_HALF_EXTENTS.y, 0.0),
            Vec3::new(-10.0, ACTOR_HALF_EXTENTS.y, 0.0),
            Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 10.0),
            Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, -10.0),
        ];

        let npc_points = vec![
            Vec3::new(12.0, ACTOR_HALF_EXTENTS.y, 12.0),
            Vec3::new(-12.0, ACTOR_HALF_EXTENTS.y, -12.0),
        ];

        Self {
            platforms,
            spawn_points,
            pickup_points,
            npc_points,
        }
    }

    /// Only the floor, with its surface at y = 0.
    pub fn flat() -> Self {
        Self {
            platforms: vec![Platform::new(
                Vec3::new(0.0, -0.5, 0.0),
                Vec3::new(1000.0, 0.5, 1000.0),
            )],
            spawn_points: vec![Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 0.0)],
            pickup_points: Vec::new(),
            npc_points: Vec::new(),
        }
    }

    /// Spawn point for the n-th participant, cycling through the list.
    pub fn spawn_point(&self, index: u32) -> Option<Vec3> {
        if self.spawn_points.is_empty() {
            return None;
        }
        Some(self.spawn_points[index as usize % self.spawn_points.len()])
    }
}

/// Point-mass body with box collision against level platforms.
#[derive(Debug, Clone)]
pub struct SimpleBody {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: f32,
    pub gravity: f32,
    pub half_extents: Vec3,
    pub freeze_rotation: bool,
    pub grounded: bool,
    level: Arc<Level>,
}

impl SimpleBody {
    pub fn new(position: Vec3, level: Arc<Level>) -> Self {
        let mut body = Self {
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: 1.0,
            gravity: GRAVITY,
            half_extents: ACTOR_HALF_EXTENTS,
            freeze_rotation: true,
            grounded: false,
            level,
        };
        body.check_grounded();
        body
    }

    pub fn level(&self) -> &Arc<Level> {
        &self.level
    }

    /// Overwrites the kinematic state, keeping mass, shape and level.
    pub fn set_state(&mut self, position: Vec3, rotation: Quat, velocity: Vec3, grounded: bool) {
        self.position = position;
        self.rotation = rotation;
        self.velocity = velocity;
        self.angular_velocity = Vec3::ZERO;
        self.grounded = grounded;
    }

    /// Pushes the body out of every overlapping platform along the axis of
    /// shallowest penetration. Returns true if anything was resolved.
    pub fn resolve_collisions(&mut self) -> bool {
        let mut collided = false;

        for platform in &self.level.platforms {
            let self_min = self.position - self.half_extents;
            let self_max = self.position + self.half_extents;
            let other_min = platform.min();
            let other_max = platform.max();

            let overlapping = self_max.x > other_min.x
                && self_min.x < other_max.x
                && self_max.y > other_min.y
                && self_min.y < other_max.y
                && self_max.z > other_min.z
                && self_min.z < other_max.z;

            if !overlapping {
                continue;
            }

            let overlap = self_max.min(other_max) - self_min.max(other_min);

            if overlap.y <= overlap.x && overlap.y <= overlap.z {
                if self.position.y > platform.center.y {
                    self.position.y = other_max.y + self.half_extents.y;
                    self.velocity.y = self.velocity.y.max(0.0);
                } else {
                    self.position.y = other_min.y - self.half_extents.y;
                    self.velocity.y = self.velocity.y.min(0.0);
                }
            } else if overlap.x <= overlap.z {
                if self.position.x < platform.center.x {
                    self.position.x = other_min.x - self.half_extents.x;
                    self.velocity.x = self.velocity.x.min(0.0);
                } else {
                    self.position.x = other_max.x + self.half_extents.x;
                    self.velocity.x = self.velocity.x.max(0.0);
                }
            } else if self.position.z < platform.center.z {
                self.position.z = other_min.z - self.half_extents.z;
                self.velocity.z = self.velocity.z.min(0.0);
            } else {
                self.position.z = other_max.z + self.half_extents.z;
                self.velocity.z = self.velocity.z.max(0.0);
            }
            collided = true;
        }

        collided
    }

    /// Updates the grounded flag: resting on (or within tolerance above) the
    /// top face of any platform while not moving upward.
    pub fn check_grounded(&mut self) {
        let self_min = self.position - self.half_extents;
        let self_max = self.position + self.half_extents;

        self.grounded = self.velocity.y <= 0.0
            && self.level.platforms.iter().any(|platform| {
                let other_min = platform.min();
                let other_max = platform.max();

                let horizontal_overlap = self_max.x > other_min.x
                    && self_min.x < other_max.x
                    && self_max.z > other_min.z
                    && self_min.z < other_max.z;
                let vertical_touching = (self_min.y - other_max.y).abs() < GROUND_TOLERANCE;

                horizontal_overlap && vertical_touching && self.position.y > platform.center.y
            });
    }
}

impl PhysicsBody for SimpleBody {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn rotation(&self) -> Quat {
        self.rotation
    }

    fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    fn apply_impulse(&mut self, impulse: Vec3) {
        self.velocity += impulse / self.mass;
    }

    fn apply_torque_impulse(&mut self, torque: Vec3) {
        if !self.freeze_rotation {
            self.angular_velocity += torque / self.mass;
        }
    }

    fn is_grounded(&self) -> bool {
        self.grounded
    }

    fn integrate(&mut self, dt: f32) -> Pose {
        self.velocity.y += self.gravity * dt;
        self.position += self.velocity * dt;

        self.resolve_collisions();
        self.check_grounded();

        if !self.freeze_rotation && self.angular_velocity.length_squared() > 0.0 {
            self.rotation = (Quat::from_scaled_axis(self.angular_velocity * dt) * self.rotation)
                .normalize();
        }

        self.pose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn flat_body(position: Vec3) -> SimpleBody {
        SimpleBody::new(position, Arc::new(Level::flat()))
    }

    #[test]
    fn test_body_at_rest_on_floor_is_grounded() {
        let body = flat_body(Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 0.0));
        assert!(body.is_grounded());
    }

    #[test]
    fn test_body_falls_and_lands() {
        let mut body = flat_body(Vec3::new(0.0, 5.0, 0.0));
        assert!(!body.is_grounded());

        for _ in 0..200 {
            body.integrate(0.02);
        }

        assert!(body.is_grounded());
        assert_approx_eq!(body.position.y, ACTOR_HALF_EXTENTS.y, 1e-4);
        assert_eq!(body.velocity.y, 0.0);
    }

    #[test]
    fn test_standing_body_stays_put() {
        let mut body = flat_body(Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 0.0));
        for _ in 0..50 {
            body.integrate(0.02);
        }
        assert!(body.is_grounded());
        assert_approx_eq!(body.position.y, ACTOR_HALF_EXTENTS.y, 1e-4);
    }

    #[test]
    fn test_impulse_leaves_ground() {
        let mut body = flat_body(Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 0.0));
        body.apply_impulse(Vec3::new(0.0, 8.0, 0.0));
        body.integrate(0.02);
        assert!(!body.is_grounded());
        assert!(body.position.y > ACTOR_HALF_EXTENTS.y);
    }

    #[test]
    fn test_impulse_scales_with_mass() {
        let mut body = flat_body(Vec3::new(0.0, 3.0, 0.0));
        body.mass = 2.0;
        body.apply_impulse(Vec3::new(4.0, 0.0, 0.0));
        assert_approx_eq!(body.velocity.x, 2.0);
    }

    #[test]
    fn test_frozen_rotation_ignores_torque() {
        let mut body = flat_body(Vec3::new(0.0, 3.0, 0.0));
        body.apply_torque_impulse(Vec3::X * 5.0);
        body.integrate(0.02);
        assert_eq!(body.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_side_collision_stops_horizontal_motion() {
        let level = Level {
            platforms: vec![
                Platform::new(Vec3::new(0.0, -0.5, 0.0), Vec3::new(50.0, 0.5, 50.0)),
                Platform::new(Vec3::new(3.0, 2.0, 0.0), Vec3::new(1.0, 2.0, 1.0)),
            ],
            spawn_points: vec![],
            pickup_points: vec![],
            npc_points: vec![],
        };
        let mut body = SimpleBody::new(Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 0.0), Arc::new(level));
        body.velocity.x = 10.0;

        for _ in 0..50 {
            body.integrate(0.02);
        }

        assert!(body.position.x <= 2.0 - ACTOR_HALF_EXTENTS.x + 1e-4);
        assert_eq!(body.velocity.x, 0.0);
    }

    #[test]
    fn test_spawn_point_cycles() {
        let level = Level::arena();
        let count = level.spawn_points.len() as u32;
        assert_eq!(level.spawn_point(0), level.spawn_point(count));
        assert!(Level {
            platforms: vec![],
            spawn_points: vec![],
            pickup_points: vec![],
            npc_points: vec![],
        }
        .spawn_point(0)
        .is_none());
    }

    #[test]
    fn test_arena_pickups_float_above_platforms() {
        let level = Level::arena();
        assert!(!level.pickup_points.is_empty());
        for point in &level.pickup_points {
            assert!(point.y > 0.0);
        }
    }
}
