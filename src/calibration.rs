//! Viewer calibration (the QR-code scan result)
//!
//! The bytes are opaque to everything except the lens-distortion backend.
//! An empty blob means "no viewer set up yet" and gates rendering.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCalibration {
    bytes: Vec<u8>,
}

impl DeviceCalibration {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_absent(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Persistent calibration storage plus the user-facing viewer switch flow.
pub trait CalibrationStore {
    /// Saved calibration, or [`DeviceCalibration::absent`] if none.
    fn saved_params(&mut self) -> DeviceCalibration;
    /// Launch the scan flow. The result lands in storage asynchronously.
    fn scan_and_save(&mut self);
}

/// Optical description of a viewer, stored as JSON in the calibration bytes.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ViewerProfile {
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
    /// Meters between lens centers.
    pub inter_lens_distance: f32,
    /// Meters from screen to lenses.
    pub screen_to_lens_distance: f32,
    /// Left eye half-angles in degrees: left, right, bottom, top.
    pub left_eye_field_of_view_angles: [f32; 4],
    /// Radial polynomial coefficients k1, k2, ...
    #[serde(default)]
    pub distortion_coefficients: Vec<f32>,
}

impl ViewerProfile {
    /// Google Cardboard v2, the usual fallback viewer.
    pub fn cardboard_v2() -> Self {
        Self {
            vendor: "Google, Inc.".to_string(),
            model: "Cardboard v2".to_string(),
            inter_lens_distance: 0.064,
            screen_to_lens_distance: 0.039,
            left_eye_field_of_view_angles: [60.0, 60.0, 60.0, 60.0],
            distortion_coefficients: vec![0.34, 0.55],
        }
    }

    pub fn decode(calibration: &DeviceCalibration) -> Result<Self> {
        if calibration.is_absent() {
            return Err(Error::Calibration("no calibration saved".to_string()));
        }
        let profile: Self = serde_json::from_slice(calibration.bytes())
            .map_err(|e| Error::Calibration(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn encode(&self) -> Result<DeviceCalibration> {
        Ok(DeviceCalibration::new(serde_json::to_vec(self)?))
    }

    fn validate(&self) -> Result<()> {
        if !(self.inter_lens_distance > 0.0) {
            return Err(Error::Calibration(format!(
                "inter_lens_distance must be positive, got {}",
                self.inter_lens_distance
            )));
        }
        if self
            .left_eye_field_of_view_angles
            .iter()
            .any(|a| !(*a > 0.0 && *a < 90.0))
        {
            return Err(Error::Calibration(format!(
                "field of view angles must be within (0, 90) degrees, got {:?}",
                self.left_eye_field_of_view_angles
            )));
        }
        Ok(())
    }
}
