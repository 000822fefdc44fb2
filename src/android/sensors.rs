//! NDK sensor head tracker
//!
//! Orientation comes from the Game Rotation Vector sensor (no magnetic
//! interference), with the gyroscope as fallback. Accelerometer, gyroscope
//! and magnetometer samples are also kept for pose streaming.

use std::cell::Cell;
use std::ptr;
use std::rc::Rc;

use glam::{Quat, Vec3};
use log::{info, warn};

use crate::tracking::{DisplayOrientation, HeadPose, HeadTracker};

const ASENSOR_TYPE_ACCELEROMETER: i32 = 1;
const ASENSOR_TYPE_MAGNETIC_FIELD: i32 = 2;
const ASENSOR_TYPE_GYROSCOPE: i32 = 4;
const ASENSOR_TYPE_GAME_ROTATION_VECTOR: i32 = 15;

/// ~60Hz
const EVENT_RATE_US: i32 = 16_000;
/// Never extrapolate further than this past the last sample.
const MAX_PREDICTION_NS: u64 = 100_000_000;

/// Latest raw motion readings, sensor frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionSample {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub magnet: [f32; 3],
}

pub struct NdkHeadTracker {
    sensor_manager: *mut ndk_sys::ASensorManager,
    event_queue: *mut ndk_sys::ASensorEventQueue,
    sensors: Vec<*const ndk_sys::ASensor>,
    has_rotation_vector: bool,
    enabled: bool,

    orientation: Quat,
    orientation_timestamp_ns: i64,
    angular_velocity: Vec3,
    motion: Rc<Cell<MotionSample>>,
}

impl NdkHeadTracker {
    pub fn new(package: &std::ffi::CStr) -> Self {
        let mut tracker = Self {
            sensor_manager: ptr::null_mut(),
            event_queue: ptr::null_mut(),
            sensors: Vec::new(),
            has_rotation_vector: false,
            enabled: false,
            orientation: Quat::IDENTITY,
            orientation_timestamp_ns: 0,
            angular_velocity: Vec3::ZERO,
            motion: Rc::default(),
        };
        tracker.init_sensors(package);
        tracker
    }

    /// Shared view of the latest raw readings.
    pub fn motion_handle(&self) -> Rc<Cell<MotionSample>> {
        self.motion.clone()
    }

    pub fn is_available(&self) -> bool {
        !self.event_queue.is_null() && !self.sensors.is_empty()
    }

    fn init_sensors(&mut self, package: &std::ffi::CStr) {
        info!("Initializing head tracking sensors...");

        unsafe {
            self.sensor_manager = ndk_sys::ASensorManager_getInstanceForPackage(package.as_ptr());
            if self.sensor_manager.is_null() {
                info!("Failed to get ASensorManager, trying fallback");
                self.sensor_manager = ndk_sys::ASensorManager_getInstance();
            }
            if self.sensor_manager.is_null() {
                warn!("ASensorManager not available");
                return;
            }

            let rotation = ndk_sys::ASensorManager_getDefaultSensor(
                self.sensor_manager,
                ASENSOR_TYPE_GAME_ROTATION_VECTOR,
            );
            self.has_rotation_vector = !rotation.is_null();
            if !self.has_rotation_vector {
                info!("Game Rotation Vector not available, integrating gyroscope");
            }

            for kind in [
                ASENSOR_TYPE_GAME_ROTATION_VECTOR,
                ASENSOR_TYPE_GYROSCOPE,
                ASENSOR_TYPE_ACCELEROMETER,
                ASENSOR_TYPE_MAGNETIC_FIELD,
            ] {
                let sensor = ndk_sys::ASensorManager_getDefaultSensor(self.sensor_manager, kind);
                if !sensor.is_null() {
                    self.sensors.push(sensor);
                }
            }
            if self.sensors.is_empty() {
                warn!("No motion sensors available");
                return;
            }

            let mut looper = ndk_sys::ALooper_forThread();
            if looper.is_null() {
                looper = ndk_sys::ALooper_prepare(0);
            }
            if looper.is_null() {
                warn!("Failed to get ALooper");
                return;
            }

            self.event_queue = ndk_sys::ASensorManager_createEventQueue(
                self.sensor_manager,
                looper,
                0,
                None,
                ptr::null_mut(),
            );
            if self.event_queue.is_null() {
                warn!("Failed to create sensor event queue");
                return;
            }
        }

        info!("Head tracking sensors ready ({} sensors)", self.sensors.len());
    }

    fn enable(&mut self) {
        if self.enabled || !self.is_available() {
            return;
        }
        for &sensor in &self.sensors {
            unsafe {
                let rc = ndk_sys::ASensorEventQueue_enableSensor(self.event_queue, sensor);
                if rc < 0 {
                    warn!("Failed to enable sensor: {}", rc);
                    continue;
                }
                ndk_sys::ASensorEventQueue_setEventRate(self.event_queue, sensor, EVENT_RATE_US);
            }
        }
        self.enabled = true;
    }

    fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        for &sensor in &self.sensors {
            unsafe {
                ndk_sys::ASensorEventQueue_disableSensor(self.event_queue, sensor);
            }
        }
        self.enabled = false;
    }

    /// Drains pending sensor events without blocking.
    fn poll(&mut self) {
        if !self.enabled {
            return;
        }
        let mut motion = self.motion.get();

        unsafe {
            let mut event: ndk_sys::ASensorEvent = std::mem::zeroed();
            while ndk_sys::ASensorEventQueue_getEvents(self.event_queue, &mut event, 1) > 0 {
                let data = event.__bindgen_anon_1.__bindgen_anon_1.data;
                let xyz = [data[0], data[1], data[2]];
                match event.type_ {
                    ASENSOR_TYPE_GAME_ROTATION_VECTOR => {
                        let (x, y, z) = (data[0], data[1], data[2]);
                        let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
                        self.orientation = Quat::from_xyzw(x, y, z, w).normalize();
                        self.orientation_timestamp_ns = event.timestamp;
                    }
                    ASENSOR_TYPE_GYROSCOPE => {
                        let omega = Vec3::from(xyz);
                        if !self.has_rotation_vector && self.orientation_timestamp_ns != 0 {
                            let dt = (event.timestamp - self.orientation_timestamp_ns) as f32 * 1e-9;
                            self.orientation =
                                (self.orientation * Quat::from_scaled_axis(omega * dt)).normalize();
                        }
                        if !self.has_rotation_vector {
                            self.orientation_timestamp_ns = event.timestamp;
                        }
                        self.angular_velocity = omega;
                        motion.gyro = xyz;
                    }
                    ASENSOR_TYPE_ACCELEROMETER => motion.accel = xyz,
                    ASENSOR_TYPE_MAGNETIC_FIELD => motion.magnet = xyz,
                    _ => {}
                }
            }
        }

        self.motion.set(motion);
    }
}

impl HeadTracker for NdkHeadTracker {
    fn pause(&mut self) {
        self.disable();
    }

    fn resume(&mut self) {
        self.enable();
    }

    fn pose(&mut self, timestamp_ns: u64, orientation: DisplayOrientation) -> HeadPose {
        self.poll();

        // Extrapolate along the last angular velocity up to the target time.
        let ahead_ns = timestamp_ns
            .saturating_sub(self.orientation_timestamp_ns.max(0) as u64)
            .min(MAX_PREDICTION_NS);
        let predicted = if self.orientation_timestamp_ns > 0 {
            self.orientation * Quat::from_scaled_axis(self.angular_velocity * (ahead_ns as f32 * 1e-9))
        } else {
            self.orientation
        };

        // Sensor world is Z-up; the renderer's world is Y-up.
        let world = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2);
        let display = Quat::from_rotation_z(orientation.screen_rotation());
        let head = (world * predicted * display).normalize();

        HeadPose {
            position: [0.0; 3],
            orientation: head.to_array(),
        }
    }
}

impl Drop for NdkHeadTracker {
    fn drop(&mut self) {
        self.disable();
        unsafe {
            if !self.event_queue.is_null() && !self.sensor_manager.is_null() {
                ndk_sys::ASensorManager_destroyEventQueue(self.sensor_manager, self.event_queue);
            }
        }
    }
}
