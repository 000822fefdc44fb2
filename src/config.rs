//! Tunable passthrough parameters
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tracking::DisplayOrientation;

/// Which passthrough renderer draws the camera quad.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum PassthroughVariant {
    /// Shader program bound to the per-eye model-view-projection matrix;
    /// the quad's vertices still land as clip-space coordinates.
    #[default]
    Shader,
    /// Screen-aligned quad, no transform bound or applied.
    Direct,
    /// Opt-in: the vertex stage applies the MVP, placing the quad
    /// `passthrough_distance` in front of the eyes.
    Projected,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PoseStreamConfig {
    /// `host:port` of the pose receiver.
    pub address: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(default)]
pub struct PassthroughConfig {
    pub z_near: f32,
    pub z_far: f32,
    pub floor_height: f32,
    pub prediction_offset_ms: u64,
    pub passthrough_size: f32,
    /// Meters in front of the eyes the passthrough plane is placed at.
    pub passthrough_distance: f32,
    pub variant: PassthroughVariant,
    /// Multiply the tracked head pose into each eye view.
    pub apply_head_pose: bool,
    pub display_orientation: DisplayOrientation,
    pub pose_stream: Option<PoseStreamConfig>,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            z_near: 0.1,
            z_far: 100.0,
            floor_height: -1.7,
            prediction_offset_ms: 50,
            passthrough_size: 0.5,
            passthrough_distance: 1.0,
            variant: PassthroughVariant::Shader,
            apply_head_pose: false,
            display_orientation: DisplayOrientation::LandscapeLeft,
            pose_stream: None,
        }
    }
}

impl PassthroughConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.z_near > 0.0) {
            return Err(Error::Config(format!("z_near must be positive, got {}", self.z_near)));
        }
        if !(self.z_far > self.z_near) {
            return Err(Error::Config(format!(
                "z_far ({}) must be beyond z_near ({})",
                self.z_far, self.z_near
            )));
        }
        if !(self.passthrough_size > 0.0) {
            return Err(Error::Config(format!(
                "passthrough_size must be positive, got {}",
                self.passthrough_size
            )));
        }
        if !(self.passthrough_distance >= self.z_near && self.passthrough_distance <= self.z_far) {
            return Err(Error::Config(format!(
                "passthrough_distance ({}) must lie between the clip planes",
                self.passthrough_distance
            )));
        }
        Ok(())
    }

    pub fn prediction_offset(&self) -> Duration {
        Duration::from_millis(self.prediction_offset_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = PassthroughConfig::from_json("{}").unwrap();
        assert_eq!(config, PassthroughConfig::default());
        assert_eq!(config.prediction_offset(), Duration::from_millis(50));
        assert!(!config.apply_head_pose);
    }

    #[test]
    fn parses_variant_and_stream() {
        let config = PassthroughConfig::from_json(
            r#"{
                "variant": "direct",
                "apply_head_pose": true,
                "display_orientation": "landscape_right",
                "pose_stream": { "address": "192.168.0.10:50001" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.variant, PassthroughVariant::Direct);
        assert!(config.apply_head_pose);
        assert_eq!(config.display_orientation, DisplayOrientation::LandscapeRight);
        assert_eq!(config.pose_stream.unwrap().address, "192.168.0.10:50001");
    }

    #[test]
    fn projected_variant_is_opt_in() {
        assert_eq!(PassthroughConfig::default().variant, PassthroughVariant::Shader);
        let config = PassthroughConfig::from_json(r#"{ "variant": "projected" }"#).unwrap();
        assert_eq!(config.variant, PassthroughVariant::Projected);
    }

    #[test]
    fn rejects_inverted_clip_planes() {
        let err = PassthroughConfig::from_json(r#"{ "z_near": 5.0, "z_far": 1.0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_non_positive_size() {
        assert!(PassthroughConfig::from_json(r#"{ "passthrough_size": 0.0 }"#).is_err());
    }

    #[test]
    fn rejects_plane_outside_clip_range() {
        assert!(PassthroughConfig::from_json(r#"{ "passthrough_distance": 0.05 }"#).is_err());
    }

    #[test]
    fn bad_json_is_a_json_error() {
        assert!(matches!(PassthroughConfig::from_json("{"), Err(Error::Json(_))));
    }
}
