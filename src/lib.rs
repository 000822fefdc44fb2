//! PhoneXR passthrough - stereo camera passthrough for phone-in-viewer VR
//!
//! The camera image is drawn as a textured quad into each eye's half of an
//! offscreen target, then warped onto the display through the viewer's lens
//! distortion meshes. Everything above the GPU device is platform-neutral;
//! the Android front end lives in `android`.

pub mod app;
pub mod calibration;
pub mod compositor;
pub mod config;
pub mod device_params;
pub mod error;
pub mod gpu;
pub mod lens;
pub mod math;
pub mod passthrough;
pub mod quad;
pub mod sensor_packet;
pub mod tracking;

#[cfg(target_os = "android")]
mod android;

#[cfg(test)]
mod testing;

pub use app::{Capabilities, FrameStatus, PassthroughApp};
pub use config::{PassthroughConfig, PassthroughVariant};
pub use error::{Error, Result};
