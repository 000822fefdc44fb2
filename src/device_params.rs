//! Device parameter manager
//!
//! Watches for screen or viewer changes and rebuilds everything derived from
//! them: the lens distortion object, the offscreen frame resources, the
//! distortion compositor with its meshes, and both eyes' matrices.
//!
//! Old objects are always released before their replacements are created, so
//! two lenses or two compositors never coexist.

use glam::Mat4;
use log::{debug, info, warn};

use crate::calibration::{CalibrationStore, DeviceCalibration};
use crate::compositor::{DistortionRenderer, DistortionRendererFactory};
use crate::gpu::{check_gpu, FrameBufferSet, FrameResources, FramebufferId, GpuDevice, Viewport};
use crate::lens::{Eye, LensDistortion, LensDistortionFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenParams {
    pub width: u32,
    pub height: u32,
}

impl ScreenParams {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Left eye gets the left half, right eye the right half.
    pub fn eye_viewport(&self, eye: Eye) -> Viewport {
        let half = self.width / 2;
        match eye {
            Eye::Left => Viewport::new(0, 0, half, self.height),
            Eye::Right => Viewport::new(half as i32, 0, half, self.height),
        }
    }
}

/// Per-eye transforms derived from calibration and screen size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeRenderState {
    pub eye_from_head: Mat4,
    pub projection: Mat4,
}

impl Default for EyeRenderState {
    fn default() -> Self {
        Self {
            eye_from_head: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

pub struct DeviceParamManager<G: GpuDevice + ?Sized> {
    screen: ScreenParams,
    screen_params_changed: bool,
    device_params_changed: bool,
    z_near: f32,
    z_far: f32,

    lens_factory: Box<dyn LensDistortionFactory>,
    lens: Option<Box<dyn LensDistortion>>,
    /// Last calibration the lens factory refused; not retried until it changes.
    rejected: Option<DeviceCalibration>,
    compositor_factory: DistortionRendererFactory<G>,
    compositor: Option<Box<dyn DistortionRenderer<G>>>,

    eyes: [EyeRenderState; 2],
    frame: FrameResources,
}

impl<G: GpuDevice + ?Sized> DeviceParamManager<G> {
    pub fn new(
        lens_factory: Box<dyn LensDistortionFactory>,
        compositor_factory: DistortionRendererFactory<G>,
        z_near: f32,
        z_far: f32,
    ) -> Self {
        Self {
            screen: ScreenParams::default(),
            screen_params_changed: false,
            device_params_changed: false,
            z_near,
            z_far,
            lens_factory,
            lens: None,
            rejected: None,
            compositor_factory,
            compositor: None,
            eyes: [EyeRenderState::default(); 2],
            frame: FrameResources::new(),
        }
    }

    pub fn screen(&self) -> ScreenParams {
        self.screen
    }

    pub fn set_screen_params(&mut self, width: u32, height: u32) {
        self.screen = ScreenParams { width, height };
        self.screen_params_changed = true;
    }

    /// Viewer may have changed (resume, QR scan).
    pub fn mark_device_params_changed(&mut self) {
        self.device_params_changed = true;
    }

    pub fn needs_update(&self) -> bool {
        self.screen_params_changed || self.device_params_changed
    }

    pub fn eye_state(&self, eye: Eye) -> &EyeRenderState {
        &self.eyes[eye.index()]
    }

    pub fn frame_buffers(&self) -> Option<&FrameBufferSet> {
        self.frame.current()
    }

    pub fn has_lens(&self) -> bool {
        self.lens.is_some()
    }

    /// Rebuilds derived state if anything changed.
    ///
    /// Returns `false` while no usable calibration is saved; the caller must
    /// skip the frame.
    pub fn update(&mut self, gpu: &mut G, store: &mut dyn CalibrationStore) -> bool {
        if !self.needs_update() {
            return true;
        }

        if self.screen.is_empty() {
            debug!("Screen size unknown, skipping frame");
            return false;
        }

        let calibration = store.saved_params();
        if calibration.is_absent() {
            debug!("No viewer calibration saved, skipping frame");
            return false;
        }

        if self.rejected.as_ref() == Some(&calibration) {
            return false;
        }

        let ScreenParams { width, height } = self.screen;

        drop(self.lens.take());
        let lens = match self.lens_factory.create(&calibration, width, height) {
            Ok(lens) => lens,
            Err(e) => {
                warn!("Cannot use saved viewer calibration: {}", e);
                self.rejected = Some(calibration);
                return false;
            }
        };
        self.rejected = None;

        self.frame.allocate(gpu, width, height);

        if let Some(mut old) = self.compositor.take() {
            old.release(gpu);
        }
        let mut compositor = (self.compositor_factory)(gpu);

        for eye in Eye::BOTH {
            compositor.set_mesh(gpu, lens.distortion_mesh(eye), eye);
            self.eyes[eye.index()] = EyeRenderState {
                eye_from_head: lens.eye_from_head_matrix(eye),
                projection: lens.projection_matrix(eye, self.z_near, self.z_far),
            };
        }

        self.lens = Some(lens);
        self.compositor = Some(compositor);
        self.screen_params_changed = false;
        self.device_params_changed = false;

        check_gpu(gpu, "UpdateDeviceParams");
        info!("Device parameters updated for {}x{}", width, height);
        true
    }

    /// Hands both eye regions to the compositor. `false` if nothing is set up.
    pub fn composite(&mut self, gpu: &mut G, target: FramebufferId, viewport: Viewport) -> bool {
        let (Some(compositor), Some(set)) = (self.compositor.as_mut(), self.frame.current()) else {
            return false;
        };
        compositor.render_eye_to_display(
            gpu,
            target,
            viewport,
            set.eye(Eye::Left),
            set.eye(Eye::Right),
        );
        true
    }

    /// Frees GPU objects and drops the lens. Safe to call repeatedly.
    pub fn release(&mut self, gpu: &mut G) {
        if let Some(mut compositor) = self.compositor.take() {
            compositor.release(gpu);
        }
        self.frame.release(gpu);
        self.lens = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{DeviceCalibration, ViewerProfile};
    use crate::lens::MESH_RESOLUTION;
    use crate::testing::{
        recording_compositors, GpuCall, MemoryStore, RecordingGpu, TracingLensFactory,
    };

    fn manager() -> (DeviceParamManager<RecordingGpu>, std::rc::Rc<std::cell::RefCell<Vec<String>>>) {
        let lenses = TracingLensFactory::default();
        let events = lenses.events.clone();
        (
            DeviceParamManager::new(Box::new(lenses), recording_compositors(), 0.1, 100.0),
            events,
        )
    }

    #[test]
    fn nothing_pending_is_ready() {
        let (mut params, _) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::default();

        assert!(params.update(&mut gpu, &mut store));
        assert!(gpu.calls.is_empty());
        assert_eq!(store.0.borrow().reads, 0);
    }

    #[test]
    fn absent_calibration_blocks_and_mutates_nothing() {
        let (mut params, events) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::default();
        params.set_screen_params(1920, 1080);
        params.mark_device_params_changed();

        assert!(!params.update(&mut gpu, &mut store));

        assert!(gpu.calls.is_empty());
        assert!(events.borrow().is_empty());
        assert!(params.frame_buffers().is_none());
        assert_eq!(*params.eye_state(Eye::Left), EyeRenderState::default());
        assert_eq!(*params.eye_state(Eye::Right), EyeRenderState::default());
        assert!(params.needs_update());
    }

    #[test]
    fn absent_calibration_keeps_previous_derivation() {
        let (mut params, _) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::with_profile(&ViewerProfile::cardboard_v2());
        params.set_screen_params(1920, 1080);
        assert!(params.update(&mut gpu, &mut store));
        let before = (*params.eye_state(Eye::Left), *params.eye_state(Eye::Right));
        let calls = gpu.calls.len();

        store.set(DeviceCalibration::absent());
        params.mark_device_params_changed();
        assert!(!params.update(&mut gpu, &mut store));

        assert_eq!((*params.eye_state(Eye::Left), *params.eye_state(Eye::Right)), before);
        assert_eq!(gpu.calls.len(), calls);
    }

    #[test]
    fn valid_calibration_builds_everything_at_screen_size() {
        let (mut params, _) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::with_profile(&ViewerProfile::cardboard_v2());
        params.set_screen_params(1920, 1080);

        assert!(params.update(&mut gpu, &mut store));

        let set = params.frame_buffers().unwrap();
        assert_eq!((set.width, set.height), (1920, 1080));
        assert_eq!(set.left_eye.texture, set.right_eye.texture);
        assert!(!params.needs_update());

        let meshes: Vec<_> = gpu
            .calls
            .iter()
            .filter_map(|c| match c {
                GpuCall::SetMesh(_, eye, n) => Some((*eye, *n)),
                _ => None,
            })
            .collect();
        let n = MESH_RESOLUTION * MESH_RESOLUTION;
        assert_eq!(meshes, vec![(Eye::Left, n), (Eye::Right, n)]);

        let left = params.eye_state(Eye::Left);
        let right = params.eye_state(Eye::Right);
        assert!((left.eye_from_head.w_axis.x - 0.032).abs() < 1e-6);
        assert!((right.eye_from_head.w_axis.x + 0.032).abs() < 1e-6);
        assert_ne!(left.projection, Mat4::IDENTITY);
    }

    #[test]
    fn every_resize_gets_matching_frame_buffers() {
        let (mut params, _) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::with_profile(&ViewerProfile::cardboard_v2());

        for (w, h) in [(1920, 1080), (2400, 1080), (1280, 720), (1, 1)] {
            params.set_screen_params(w, h);
            assert!(params.update(&mut gpu, &mut store));

            let set = params.frame_buffers().unwrap();
            assert_eq!((set.width, set.height), (w, h));
            assert_eq!(set.left_eye.texture, set.texture);
            assert_eq!(set.right_eye.texture, set.texture);
            assert_eq!((set.left_eye.left_u, set.left_eye.right_u), (0.0, 0.5));
            assert_eq!((set.right_eye.left_u, set.right_eye.right_u), (0.5, 1.0));
        }

        // One frame buffer set plus nothing orphaned.
        assert_eq!(gpu.live_objects().len(), 3);
    }

    #[test]
    fn old_lens_and_compositor_go_before_new_ones() {
        let (mut params, events) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::with_profile(&ViewerProfile::cardboard_v2());
        params.set_screen_params(1920, 1080);
        params.update(&mut gpu, &mut store);

        params.mark_device_params_changed();
        params.update(&mut gpu, &mut store);

        assert_eq!(
            *events.borrow(),
            vec![
                "create lens 1 1920x1080".to_string(),
                "drop lens 1".to_string(),
                "create lens 2 1920x1080".to_string(),
            ]
        );

        let lifecycle: Vec<_> = gpu
            .calls
            .iter()
            .filter(|c| matches!(c, GpuCall::CompositorCreated(_) | GpuCall::CompositorReleased(_)))
            .cloned()
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                GpuCall::CompositorCreated(1),
                GpuCall::CompositorReleased(1),
                GpuCall::CompositorCreated(2),
            ]
        );
    }

    #[test]
    fn malformed_calibration_is_not_ready() {
        let (mut params, _) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::default();
        store.set(DeviceCalibration::new(b"not a viewer".to_vec()));
        params.set_screen_params(1920, 1080);

        assert!(!params.update(&mut gpu, &mut store));
        assert!(params.frame_buffers().is_none());
        assert!(params.needs_update());
    }

    #[test]
    fn rejected_calibration_is_not_decoded_again_until_it_changes() {
        let (mut params, events) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::default();
        store.set(DeviceCalibration::new(b"not a viewer".to_vec()));
        params.set_screen_params(1920, 1080);

        for _ in 0..3 {
            assert!(!params.update(&mut gpu, &mut store));
        }
        assert_eq!(*events.borrow(), vec!["reject calibration"]);

        store.set(DeviceCalibration::new(b"still not a viewer".to_vec()));
        assert!(!params.update(&mut gpu, &mut store));
        assert_eq!(events.borrow().len(), 2);

        store.set(ViewerProfile::cardboard_v2().encode().unwrap());
        assert!(params.update(&mut gpu, &mut store));
        assert_eq!(events.borrow().last().unwrap(), "create lens 1 1920x1080");
    }

    #[test]
    fn unknown_screen_size_is_not_ready() {
        let (mut params, _) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::with_profile(&ViewerProfile::cardboard_v2());
        params.mark_device_params_changed();

        assert!(!params.update(&mut gpu, &mut store));
        assert_eq!(store.0.borrow().reads, 0);
    }

    #[test]
    fn composite_needs_setup() {
        let (mut params, _) = manager();
        let mut gpu = RecordingGpu::default();
        assert!(!params.composite(&mut gpu, FramebufferId::NONE, Viewport::full(10, 10)));
        assert_eq!(gpu.composites(), 0);
    }

    #[test]
    fn release_frees_all_gpu_objects() {
        let (mut params, events) = manager();
        let mut gpu = RecordingGpu::default();
        let mut store = MemoryStore::with_profile(&ViewerProfile::cardboard_v2());
        params.set_screen_params(800, 480);
        params.update(&mut gpu, &mut store);

        params.release(&mut gpu);
        params.release(&mut gpu);

        assert!(gpu.live_objects().is_empty());
        assert!(!params.has_lens());
        assert_eq!(events.borrow().last().unwrap(), "drop lens 1");
    }

    #[test]
    fn eye_viewports_split_the_screen() {
        let screen = ScreenParams {
            width: 1920,
            height: 1080,
        };
        assert_eq!(screen.eye_viewport(Eye::Left), Viewport::new(0, 0, 960, 1080));
        assert_eq!(screen.eye_viewport(Eye::Right), Viewport::new(960, 0, 960, 1080));
    }
}
