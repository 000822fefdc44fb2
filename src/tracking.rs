//! Head tracking and pose prediction
//!
//! The tracker itself (sensor fusion) lives behind [`HeadTracker`]. The
//! predictor only adds a fixed look-ahead to the query timestamp so the pose
//! matches the moment the frame reaches the display.

use glam::Mat4;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::math;

/// Screen orientation the tracker should report poses for.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayOrientation {
    #[default]
    LandscapeLeft,
    LandscapeRight,
    Portrait,
    PortraitUpsideDown,
}

impl DisplayOrientation {
    /// Rotation about the screen normal from the device's natural (portrait)
    /// frame to this display frame, in radians.
    pub fn screen_rotation(self) -> f32 {
        use std::f32::consts::{FRAC_PI_2, PI};
        match self {
            DisplayOrientation::Portrait => 0.0,
            DisplayOrientation::LandscapeLeft => FRAC_PI_2,
            DisplayOrientation::PortraitUpsideDown => PI,
            DisplayOrientation::LandscapeRight => -FRAC_PI_2,
        }
    }
}

/// A single tracker sample. Not persisted; queried fresh every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub position: [f32; 3],
    /// Quaternion, `[x, y, z, w]`.
    pub orientation: [f32; 4],
}

impl HeadPose {
    pub const IDENTITY: Self = Self {
        position: [0.0; 3],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };

    /// translation(position) * rotation(orientation)
    pub fn to_matrix(&self) -> Mat4 {
        math::pose_matrix(self.position, self.orientation)
    }
}

impl Default for HeadPose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Head tracking capability. Created by the platform, destroyed on drop.
pub trait HeadTracker {
    fn pause(&mut self);
    fn resume(&mut self);
    /// Pose expected at `timestamp_ns` on the boot-time clock.
    fn pose(&mut self, timestamp_ns: u64, orientation: DisplayOrientation) -> HeadPose;
}

/// Monotonic clock in the tracker's time base.
pub trait Clock {
    fn now_ns(&self) -> u64;
}

/// `CLOCK_BOOTTIME`, the time base Android sensor events are stamped with.
#[derive(Debug, Default, Clone, Copy)]
pub struct BootClock;

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Clock for BootClock {
    fn now_ns(&self) -> u64 {
        // Safety: timespec is plain data; CLOCK_BOOTTIME exists on these targets.
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_BOOTTIME, &mut ts) };
        if rc != 0 {
            return 0;
        }
        ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl Clock for BootClock {
    fn now_ns(&self) -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;

        static START: OnceLock<Instant> = OnceLock::new();
        START.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Queries the tracker `offset` ahead of now to hide pipeline latency.
pub struct PosePredictor {
    tracker: Box<dyn HeadTracker>,
    clock: Box<dyn Clock>,
    offset: Duration,
    orientation: DisplayOrientation,
}

impl PosePredictor {
    pub fn new(
        tracker: Box<dyn HeadTracker>,
        clock: Box<dyn Clock>,
        offset: Duration,
        orientation: DisplayOrientation,
    ) -> Self {
        Self {
            tracker,
            clock,
            offset,
            orientation,
        }
    }

    /// Timestamp the next query will use.
    pub fn predicted_timestamp_ns(&self) -> u64 {
        let offset = u64::try_from(self.offset.as_nanos()).unwrap_or(u64::MAX);
        self.clock.now_ns().saturating_add(offset)
    }

    pub fn predict_pose(&mut self) -> HeadPose {
        let timestamp = self.predicted_timestamp_ns();
        let pose = self.tracker.pose(timestamp, self.orientation);
        debug!("Pose @{}ns: pos={:?} rot={:?}", timestamp, pose.position, pose.orientation);
        pose
    }

    /// Predicted head transform, translation then rotation.
    pub fn predict_head_matrix(&mut self) -> Mat4 {
        self.predict_pose().to_matrix()
    }

    pub fn pause(&mut self) {
        self.tracker.pause();
    }

    pub fn resume(&mut self) {
        self.tracker.resume();
    }
}
