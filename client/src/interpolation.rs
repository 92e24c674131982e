//! Smooth rendering of remote actors from sparse, jittery snapshots.
//!
//! Each remote actor gets its own [`SnapshotInterpolator`]. Rendering runs a
//! fixed delay behind the newest authority time so there is usually a pair of
//! snapshots bracketing the render time. The bracketed pose is then eased
//! toward with exponential smoothing, which hides the occasional late packet.
//! Nothing is ever extrapolated: when the buffer runs dry the actor holds at
//! the newest known pose.

use log::trace;
use shared::{ConfigError, Pose, Snapshot};
use std::collections::VecDeque;

pub const DEFAULT_INTERPOLATION_DELAY: f64 = 0.1;
pub const DEFAULT_SMOOTHING_RATE: f32 = 12.0;
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationConfig {
    /// Seconds the render time trails the authority clock.
    pub delay: f64,
    /// Per-second rate of the exponential smoothing.
    pub smoothing_rate: f32,
    pub capacity: usize,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_INTERPOLATION_DELAY,
            smoothing_rate: DEFAULT_SMOOTHING_RATE,
            capacity: DEFAULT_SNAPSHOT_CAPACITY,
        }
    }
}

impl InterpolationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.delay.is_finite() && self.delay >= 0.0) {
            return Err(ConfigError::NotPositive {
                name: "interpolation delay",
                value: self.delay as f32,
            });
        }
        if !(self.smoothing_rate.is_finite() && self.smoothing_rate > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "smoothing_rate",
                value: self.smoothing_rate,
            });
        }
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "snapshot capacity",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotInterpolator {
    config: InterpolationConfig,
    buffer: VecDeque<Snapshot>,
    rendered: Option<Pose>,
}

impl SnapshotInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            buffer: VecDeque::with_capacity(config.capacity.max(1)),
            rendered: None,
        }
    }

    /// Buffers a snapshot. Anything not newer than the newest buffered
    /// snapshot is stale or a duplicate and is discarded.
    pub fn push(&mut self, snapshot: Snapshot) -> bool {
        if !snapshot.timestamp.is_finite() {
            return false;
        }
        if let Some(newest) = self.buffer.back() {
            if snapshot.timestamp <= newest.timestamp {
                trace!(
                    "Discarding stale snapshot {:.3} (newest {:.3})",
                    snapshot.timestamp,
                    newest.timestamp
                );
                return false;
            }
        }

        self.buffer.push_back(snapshot);
        while self.buffer.len() > self.config.capacity.max(1) {
            self.buffer.pop_front();
        }
        true
    }

    /// The bracketed pose at `render_time`, clamped to the buffered range.
    pub fn sample(&self, render_time: f64) -> Option<Pose> {
        let first = self.buffer.front()?;
        if render_time <= first.timestamp {
            return Some(first.pose());
        }

        for (older, newer) in self.buffer.iter().zip(self.buffer.iter().skip(1)) {
            if render_time < newer.timestamp {
                let span = newer.timestamp - older.timestamp;
                let t = ((render_time - older.timestamp) / span).clamp(0.0, 1.0) as f32;
                return Some(older.pose().blend(&newer.pose(), t));
            }
        }

        self.buffer.back().map(Snapshot::pose)
    }

    /// Render tick. `now` is the estimated authority time, `dt` the frame
    /// time. Returns the pose to draw, or the last drawn pose if the buffer
    /// is empty.
    pub fn update(&mut self, now: f64, dt: f32) -> Option<Pose> {
        if self.rendered.is_none() {
            self.rendered = self.buffer.front().map(Snapshot::pose);
        }

        let render_time = now - self.config.delay;
        let Some(target) = self.sample(render_time) else {
            return self.rendered;
        };
        self.evict_before(render_time);

        let rendered = match self.rendered {
            Some(current) if current != target => {
                let alpha = 1.0 - (-self.config.smoothing_rate * dt.max(0.0)).exp();
                current.blend(&target, alpha)
            }
            _ => target,
        };
        self.rendered = Some(rendered);
        Some(rendered)
    }

    /// Drops snapshots no longer needed as the older half of a bracket.
    fn evict_before(&mut self, render_time: f64) {
        while self.buffer.len() >= 2 && self.buffer[1].timestamp <= render_time {
            self.buffer.pop_front();
        }
    }

    pub fn rendered(&self) -> Option<Pose> {
        self.rendered
    }

    pub fn newest_timestamp(&self) -> Option<f64> {
        self.buffer.back().map(|s| s.timestamp)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.rendered = None;
    }
}

impl Default for SnapshotInterpolator {
    fn default() -> Self {
        Self::new(InterpolationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::{Quat, Vec3};

    const FRAME: f32 = 1.0 / 60.0;

    fn at(timestamp: f64, x: f32) -> Snapshot {
        Snapshot::new(timestamp, Vec3::new(x, 0.0, 0.0), Quat::IDENTITY)
    }

    #[test]
    fn test_empty_buffer_has_no_pose() {
        let mut interpolator = SnapshotInterpolator::default();
        assert_eq!(interpolator.update(1.0, FRAME), None);
    }

    #[test]
    fn test_single_snapshot_is_rendered_unchanged() {
        let mut interpolator = SnapshotInterpolator::default();
        let snapshot = Snapshot::new(0.5, Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.7));
        interpolator.push(snapshot);

        for frame in 0..30 {
            let pose = interpolator.update(0.5 + frame as f64 * 0.05, FRAME).unwrap();
            assert_eq!(pose, snapshot.pose());
        }
    }

    #[test]
    fn test_render_between_brackets() {
        let mut interpolator = SnapshotInterpolator::default();
        interpolator.push(at(0.0, 0.0));
        interpolator.push(at(0.1, 1.0));
        interpolator.push(at(0.2, 2.0));

        let pose = interpolator.update(0.2, FRAME).unwrap();
        assert!(pose.position.x > 0.0);
        assert!(pose.position.x < 1.0);
    }

    #[test]
    fn test_sample_lerps_position_and_slerps_rotation() {
        let mut interpolator = SnapshotInterpolator::default();
        interpolator.push(Snapshot::new(1.0, Vec3::ZERO, Quat::IDENTITY));
        interpolator.push(Snapshot::new(
            2.0,
            Vec3::new(4.0, 0.0, 0.0),
            Quat::from_rotation_y(1.0),
        ));

        let pose = interpolator.sample(1.25).unwrap();
        assert_approx_eq!(pose.position.x, 1.0, 1e-5);
        assert_approx_eq!(pose.rotation.angle_between(Quat::IDENTITY), 0.25, 1e-4);
    }

    #[test]
    fn test_starved_buffer_clamps_to_newest() {
        let mut interpolator = SnapshotInterpolator::default();
        interpolator.push(at(0.0, 0.0));
        interpolator.push(at(0.1, 1.0));

        assert_eq!(interpolator.sample(5.0).unwrap().position.x, 1.0);
        assert_eq!(interpolator.sample(-5.0).unwrap().position.x, 0.0);
    }

    #[test]
    fn test_smoothing_converges_to_target() {
        let mut interpolator = SnapshotInterpolator::default();
        interpolator.push(at(0.0, 0.0));
        interpolator.push(at(0.1, 1.0));

        let mut last = 0.0;
        for frame in 0..120 {
            let pose = interpolator.update(1.0 + frame as f64 * FRAME as f64, FRAME).unwrap();
            assert!(pose.position.x >= last);
            last = pose.position.x;
        }
        assert_approx_eq!(last, 1.0, 1e-3);
    }

    #[test]
    fn test_stale_and_duplicate_snapshots_are_discarded() {
        let mut interpolator = SnapshotInterpolator::default();
        assert!(interpolator.push(at(0.2, 2.0)));
        assert!(!interpolator.push(at(0.2, 2.0)));
        assert!(!interpolator.push(at(0.1, 1.0)));
        assert!(!interpolator.push(at(f64::NAN, 1.0)));
        assert_eq!(interpolator.len(), 1);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut interpolator = SnapshotInterpolator::new(InterpolationConfig {
            capacity: 3,
            ..InterpolationConfig::default()
        });
        for i in 0..5 {
            interpolator.push(at(i as f64 * 0.1, i as f32));
        }

        assert_eq!(interpolator.len(), 3);
        assert_eq!(interpolator.sample(-1.0).unwrap().position.x, 2.0);
    }

    #[test]
    fn test_old_snapshots_are_evicted() {
        let mut interpolator = SnapshotInterpolator::default();
        for i in 0..10 {
            interpolator.push(at(i as f64 * 0.1, i as f32));
        }

        interpolator.update(0.65, FRAME);
        assert_eq!(interpolator.len(), 5);
        assert_eq!(interpolator.newest_timestamp(), Some(9.0 * 0.1));
    }

    #[test]
    fn test_config_validation() {
        assert!(InterpolationConfig::default().validate().is_ok());
        assert!(InterpolationConfig {
            capacity: 0,
            ..InterpolationConfig::default()
        }
        .validate()
        .is_err());
        assert!(InterpolationConfig {
            smoothing_rate: 0.0,
            ..InterpolationConfig::default()
        }
        .validate()
        .is_err());
    }
}
