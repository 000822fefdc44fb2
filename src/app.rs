//! Passthrough app: the host-facing surface and the per-frame pipeline
//!
//! Everything here runs on the thread that owns the GPU context. The host
//! serializes lifecycle calls (pause, resume, resize) against
//! [`PassthroughApp::render_frame`]; there is no internal locking.

use glam::{Mat4, Vec3};
use log::{debug, info, warn};

use crate::calibration::CalibrationStore;
use crate::compositor::DistortionRendererFactory;
use crate::config::PassthroughConfig;
use crate::device_params::{DeviceParamManager, ScreenParams};
use crate::error::Result;
use crate::gpu::{check_gpu, FramebufferId, GpuDevice, RenderState, TextureId, Viewport};
use crate::lens::{Eye, LensDistortionFactory};
use crate::math;
use crate::passthrough::{passthrough_renderer, PassthroughRenderer};
use crate::quad::PassthroughQuad;
use crate::tracking::{Clock, HeadTracker, PosePredictor};

/// External services the app is built on.
pub struct Capabilities<G: GpuDevice + ?Sized> {
    pub tracker: Box<dyn HeadTracker>,
    pub clock: Box<dyn Clock>,
    pub calibration: Box<dyn CalibrationStore>,
    pub lens_factory: Box<dyn LensDistortionFactory>,
    pub compositors: DistortionRendererFactory<G>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Rendered,
    /// No viewer calibration (or no screen size) yet; nothing drawn.
    AwaitingDeviceParams,
    /// `on_surface_created` has not run yet; nothing drawn.
    SurfaceNotReady,
}

pub struct PassthroughApp<G: GpuDevice> {
    config: PassthroughConfig,
    gpu: G,
    calibration: Box<dyn CalibrationStore>,
    predictor: PosePredictor,
    params: DeviceParamManager<G>,
    passthrough: Box<dyn PassthroughRenderer<G>>,
    quad: PassthroughQuad,
    camera_texture: TextureId,
    render_viewport: Viewport,
    head_pose: Mat4,
    head_view: Mat4,
}

impl<G: GpuDevice> PassthroughApp<G> {
    pub fn new(config: PassthroughConfig, gpu: G, capabilities: Capabilities<G>) -> Self {
        let Capabilities {
            tracker,
            clock,
            calibration,
            lens_factory,
            compositors,
        } = capabilities;

        let predictor = PosePredictor::new(
            tracker,
            clock,
            config.prediction_offset(),
            config.display_orientation,
        );
        let params = DeviceParamManager::new(lens_factory, compositors, config.z_near, config.z_far);

        info!(
            "Passthrough app created: variant={:?} apply_head_pose={}",
            config.variant, config.apply_head_pose
        );

        Self {
            passthrough: passthrough_renderer(config.variant),
            quad: PassthroughQuad::new(config.passthrough_size),
            config,
            gpu,
            calibration,
            predictor,
            params,
            camera_texture: TextureId::NONE,
            render_viewport: Viewport::default(),
            head_pose: Mat4::IDENTITY,
            head_view: Mat4::IDENTITY,
        }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn device_params(&self) -> &DeviceParamManager<G> {
        &self.params
    }

    pub fn quad(&self) -> &PassthroughQuad {
        &self.quad
    }

    pub fn camera_texture(&self) -> TextureId {
        self.camera_texture
    }

    pub fn render_viewport(&self) -> Viewport {
        self.render_viewport
    }

    /// Head view used by the last rendered frame, floor offset included.
    pub fn last_head_view(&self) -> Mat4 {
        self.head_view
    }

    /// Column-major head pose the last rendered frame was drawn with.
    pub fn last_head_pose_array(&self) -> [f32; 16] {
        math::to_gl_array(&self.head_pose)
    }

    /// Builds shader programs and the camera texture.
    ///
    /// Returns the camera texture id for the platform camera pipeline.
    pub fn on_surface_created(&mut self) -> Result<TextureId> {
        self.passthrough.init(&mut self.gpu)?;

        if !self.camera_texture.is_none() {
            self.gpu.delete_texture(self.camera_texture);
        }
        self.camera_texture = self.gpu.create_external_texture();

        check_gpu(&mut self.gpu, "OnSurfaceCreated");
        Ok(self.camera_texture)
    }

    /// New surface size. Also resets the compositor viewport to full screen.
    pub fn set_screen_params(&mut self, width: u32, height: u32) {
        info!("Screen params {}x{}", width, height);
        self.params.set_screen_params(width, height);
        self.render_viewport = Viewport::full(width, height);
    }

    /// Where on the display the compositor draws.
    pub fn set_render_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.render_viewport = Viewport::new(x, y, width, height);
    }

    pub fn set_passthrough_size(&mut self, size: f32) {
        if !size.is_finite() {
            warn!("Ignoring passthrough size {}", size);
            return;
        }
        self.quad.set_size(size);
    }

    pub fn pause(&mut self) {
        info!("Pausing head tracking");
        self.predictor.pause();
    }

    pub fn resume(&mut self) {
        info!("Resuming head tracking");
        self.predictor.resume();

        // The viewer may have been swapped while paused.
        self.params.mark_device_params_changed();

        if self.calibration.saved_params().is_absent() {
            self.switch_viewer();
        }
    }

    /// Starts the viewer scan flow.
    pub fn switch_viewer(&mut self) {
        info!("Launching viewer calibration scan");
        self.calibration.scan_and_save();
        self.params.mark_device_params_changed();
    }

    /// Predicted head transform, translation then rotation.
    pub fn head_pose(&mut self) -> Mat4 {
        self.predictor.predict_head_matrix()
    }

    /// Column-major head transform for JNI callers.
    pub fn head_pose_array(&mut self) -> [f32; 16] {
        math::to_gl_array(&self.head_pose())
    }

    /// Draws both eyes and composites them to the display.
    pub fn render_frame(&mut self) -> FrameStatus {
        if !self.params.update(&mut self.gpu, self.calibration.as_mut()) {
            return FrameStatus::AwaitingDeviceParams;
        }
        if !self.passthrough.is_ready() || self.camera_texture.is_none() {
            debug!("Surface not created yet, skipping frame");
            return FrameStatus::SurfaceNotReady;
        }
        let Some(framebuffer) = self.params.frame_buffers().map(|set| set.framebuffer) else {
            return FrameStatus::AwaitingDeviceParams;
        };

        self.head_pose = self.predictor.predict_head_matrix();
        self.head_view =
            self.head_pose * math::translation(Vec3::new(0.0, self.config.floor_height, 0.0));

        self.gpu.bind_framebuffer(framebuffer);
        self.gpu.apply_render_state(&RenderState::PASSTHROUGH);
        self.gpu.clear();

        let screen: ScreenParams = self.params.screen();
        let model = math::translation(Vec3::new(0.0, 0.0, -self.config.passthrough_distance));
        for eye in Eye::BOTH {
            self.gpu.set_viewport(screen.eye_viewport(eye));

            let state = *self.params.eye_state(eye);
            let eye_view = if self.config.apply_head_pose {
                state.eye_from_head * self.head_view
            } else {
                state.eye_from_head
            };
            let mvp = state.projection * eye_view * model;

            self.passthrough
                .draw(&mut self.gpu, &self.quad, self.camera_texture, mvp);
        }

        self.params
            .composite(&mut self.gpu, FramebufferId::NONE, self.render_viewport);

        check_gpu(&mut self.gpu, "onDrawFrame");
        FrameStatus::Rendered
    }
}

impl<G: GpuDevice> Drop for PassthroughApp<G> {
    fn drop(&mut self) {
        self.params.release(&mut self.gpu);
        self.passthrough.release(&mut self.gpu);
        if !self.camera_texture.is_none() {
            self.gpu.delete_texture(self.camera_texture);
            self.camera_texture = TextureId::NONE;
        }
    }
}
