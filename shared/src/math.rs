//! Small vector/quaternion helpers used by the movement code.
//!
//! `glam` supplies the types; these functions add the rate-limited
//! "approach a target" operations the controller relies on.

use glam::{Quat, Vec3};

/// Moves `current` toward `target` by at most `max_delta`.
///
/// Lands exactly on `target` once it is within reach, so repeated calls
/// converge without overshooting.
pub fn move_towards(current: Vec3, target: Vec3, max_delta: f32) -> Vec3 {
    let to_target = target - current;
    let sq_dist = to_target.length_squared();

    if sq_dist == 0.0 || (max_delta >= 0.0 && sq_dist <= max_delta * max_delta) {
        return target;
    }

    let dist = sq_dist.sqrt();
    current + to_target / dist * max_delta
}

/// Rotates `from` toward `to` by at most `max_radians`.
pub fn rotate_towards(from: Quat, to: Quat, max_radians: f32) -> Quat {
    let angle = from.angle_between(to);
    if angle <= f32::EPSILON {
        return to;
    }

    let t = (max_radians / angle).min(1.0);
    from.slerp(to, t).normalize()
}

/// Yaw-only rotation whose forward (+Z) axis points along `direction`.
///
/// The vertical component of `direction` is ignored.
pub fn look_rotation_flat(direction: Vec3) -> Quat {
    Quat::from_rotation_y(direction.x.atan2(direction.z))
}

/// Drops the vertical component of a vector.
pub fn horizontal(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Replaces non-finite components with zero.
pub fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
