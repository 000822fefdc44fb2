//! Distortion compositor capability
//!
//! Takes the two eye regions of the offscreen texture and warps them onto the
//! display through the per-eye distortion meshes.

use crate::gpu::{EyeTextureDescription, FramebufferId, Viewport};
use crate::lens::{DistortionMesh, Eye};

pub trait DistortionRenderer<G: ?Sized> {
    fn set_mesh(&mut self, gpu: &mut G, mesh: &DistortionMesh, eye: Eye);

    fn render_eye_to_display(
        &mut self,
        gpu: &mut G,
        target: FramebufferId,
        viewport: Viewport,
        left_eye: &EyeTextureDescription,
        right_eye: &EyeTextureDescription,
    );

    /// Frees GPU objects owned by the compositor. Called before drop.
    fn release(&mut self, _gpu: &mut G) {}
}

/// Makes a fresh compositor each time device parameters change.
pub type DistortionRendererFactory<G> = Box<dyn FnMut(&mut G) -> Box<dyn DistortionRenderer<G>>>;
