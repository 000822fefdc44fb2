//! Fakes shared by the unit tests.

use glam::{Mat4, Vec2, Vec4};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use crate::calibration::{CalibrationStore, DeviceCalibration, ViewerProfile};
use crate::compositor::{DistortionRenderer, DistortionRendererFactory};
use crate::error::{Error, Result};
use crate::gpu::{
    EyeTextureDescription, FramebufferId, GpuDevice, ProgramId, QuadDraw, RenderState,
    RenderbufferId, ShaderSource, TextureId, Viewport,
};
use crate::lens::{DistortionMesh, Eye, LensDistortion, LensDistortionFactory, ProfileLensFactory};
use crate::tracking::{Clock, DisplayOrientation, HeadPose, HeadTracker};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub framebuffer: FramebufferId,
    pub viewport: Viewport,
    pub program: ProgramId,
    pub texture: TextureId,
    pub positions: [f32; 8],
    pub mvp: Option<Mat4>,
    /// Whether the drawing program multiplies positions by `mvp`.
    pub applies_mvp: bool,
}

impl RecordedDraw {
    /// Where the vertex stage puts each strip vertex, after the divide.
    pub fn clip_positions(&self) -> [Vec2; 4] {
        let transform = match (self.applies_mvp, self.mvp) {
            (true, Some(mvp)) => mvp,
            _ => Mat4::IDENTITY,
        };
        std::array::from_fn(|i| {
            let (x, y) = (self.positions[2 * i], self.positions[2 * i + 1]);
            let clip = transform * Vec4::new(x, y, 0.0, 1.0);
            Vec2::new(clip.x / clip.w, clip.y / clip.w)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateRenderTexture(TextureId, u32, u32),
    CreateExternalTexture(TextureId),
    CreateDepth(RenderbufferId, u32, u32),
    CreateFramebuffer(FramebufferId, TextureId, RenderbufferId),
    CreateProgram(ProgramId, &'static str),
    DeleteTexture(TextureId),
    DeleteRenderbuffer(RenderbufferId),
    DeleteFramebuffer(FramebufferId),
    DeleteProgram(ProgramId),
    BindFramebuffer(FramebufferId),
    RenderState(RenderState),
    Clear,
    Viewport(Viewport),
    Draw(RecordedDraw),
    CompositorCreated(u32),
    CompositorReleased(u32),
    SetMesh(u32, Eye, usize),
    Composite {
        compositor: u32,
        target: FramebufferId,
        viewport: Viewport,
        left: EyeTextureDescription,
        right: EyeTextureDescription,
    },
}

/// Records every call and tracks which object ids are alive.
#[derive(Debug, Default)]
pub struct RecordingGpu {
    pub calls: Vec<GpuCall>,
    pub pending_errors: VecDeque<u32>,
    pub fail_programs: bool,
    next_id: u32,
    live: BTreeSet<u32>,
    mvp_programs: BTreeSet<u32>,
    bound: FramebufferId,
    viewport: Viewport,
}

impl RecordingGpu {
    fn issue(&mut self) -> u32 {
        self.next_id += 1;
        self.live.insert(self.next_id);
        self.next_id
    }

    fn retire(&mut self, id: u32) {
        assert!(id != 0, "deleting the null object");
        assert!(self.live.remove(&id), "double delete of object {id}");
    }

    pub fn live_objects(&self) -> Vec<u32> {
        self.live.iter().copied().collect()
    }

    pub fn draws(&self) -> Vec<RecordedDraw> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                GpuCall::Draw(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn composites(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, GpuCall::Composite { .. }))
            .count()
    }
}

impl GpuDevice for RecordingGpu {
    fn create_render_texture(&mut self, width: u32, height: u32) -> TextureId {
        let id = TextureId(self.issue());
        self.calls.push(GpuCall::CreateRenderTexture(id, width, height));
        id
    }

    fn create_external_texture(&mut self) -> TextureId {
        let id = TextureId(self.issue());
        self.calls.push(GpuCall::CreateExternalTexture(id));
        id
    }

    fn create_depth_renderbuffer(&mut self, width: u32, height: u32) -> RenderbufferId {
        let id = RenderbufferId(self.issue());
        self.calls.push(GpuCall::CreateDepth(id, width, height));
        id
    }

    fn create_framebuffer(&mut self, color: TextureId, depth: RenderbufferId) -> FramebufferId {
        let id = FramebufferId(self.issue());
        self.calls.push(GpuCall::CreateFramebuffer(id, color, depth));
        id
    }

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId> {
        if self.fail_programs {
            return Err(Error::Shader {
                label: source.label,
                message: "link failed".to_string(),
            });
        }
        let id = ProgramId(self.issue());
        if source.applies_mvp {
            self.mvp_programs.insert(id.0);
        }
        self.calls.push(GpuCall::CreateProgram(id, source.label));
        Ok(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        self.retire(id.0);
        self.calls.push(GpuCall::DeleteTexture(id));
    }

    fn delete_renderbuffer(&mut self, id: RenderbufferId) {
        self.retire(id.0);
        self.calls.push(GpuCall::DeleteRenderbuffer(id));
    }

    fn delete_framebuffer(&mut self, id: FramebufferId) {
        self.retire(id.0);
        self.calls.push(GpuCall::DeleteFramebuffer(id));
    }

    fn delete_program(&mut self, id: ProgramId) {
        self.retire(id.0);
        self.calls.push(GpuCall::DeleteProgram(id));
    }

    fn bind_framebuffer(&mut self, id: FramebufferId) {
        self.bound = id;
        self.calls.push(GpuCall::BindFramebuffer(id));
    }

    fn apply_render_state(&mut self, state: &RenderState) {
        self.calls.push(GpuCall::RenderState(*state));
    }

    fn clear(&mut self) {
        self.calls.push(GpuCall::Clear);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.calls.push(GpuCall::Viewport(viewport));
    }

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) {
        self.calls.push(GpuCall::Draw(RecordedDraw {
            framebuffer: self.bound,
            viewport: self.viewport,
            program: draw.program,
            texture: draw.texture,
            positions: *draw.positions,
            mvp: draw.mvp,
            applies_mvp: self.mvp_programs.contains(&draw.program.0),
        }));
    }

    fn take_error(&mut self) -> Option<u32> {
        self.pending_errors.pop_front()
    }
}

/// Compositor that logs into the recording device.
pub struct RecordingCompositor {
    serial: u32,
}

impl DistortionRenderer<RecordingGpu> for RecordingCompositor {
    fn set_mesh(&mut self, gpu: &mut RecordingGpu, mesh: &DistortionMesh, eye: Eye) {
        gpu.calls
            .push(GpuCall::SetMesh(self.serial, eye, mesh.vertices.len()));
    }

    fn render_eye_to_display(
        &mut self,
        gpu: &mut RecordingGpu,
        target: FramebufferId,
        viewport: Viewport,
        left_eye: &EyeTextureDescription,
        right_eye: &EyeTextureDescription,
    ) {
        gpu.calls.push(GpuCall::Composite {
            compositor: self.serial,
            target,
            viewport,
            left: *left_eye,
            right: *right_eye,
        });
    }

    fn release(&mut self, gpu: &mut RecordingGpu) {
        gpu.calls.push(GpuCall::CompositorReleased(self.serial));
    }
}

pub fn recording_compositors() -> DistortionRendererFactory<RecordingGpu> {
    let mut serial = 0;
    Box::new(move |gpu: &mut RecordingGpu| {
        serial += 1;
        gpu.calls.push(GpuCall::CompositorCreated(serial));
        Box::new(RecordingCompositor { serial }) as Box<dyn DistortionRenderer<RecordingGpu>>
    })
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub calibration: DeviceCalibration,
    pub scans: usize,
    pub reads: usize,
}

/// In-memory calibration store; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(pub Rc<RefCell<StoreState>>);

impl MemoryStore {
    pub fn with_profile(profile: &ViewerProfile) -> Self {
        let store = Self::default();
        store.set(profile.encode().unwrap());
        store
    }

    pub fn set(&self, calibration: DeviceCalibration) {
        self.0.borrow_mut().calibration = calibration;
    }

    pub fn scans(&self) -> usize {
        self.0.borrow().scans
    }
}

impl CalibrationStore for MemoryStore {
    fn saved_params(&mut self) -> DeviceCalibration {
        let mut state = self.0.borrow_mut();
        state.reads += 1;
        state.calibration.clone()
    }

    fn scan_and_save(&mut self) {
        self.0.borrow_mut().scans += 1;
    }
}

pub struct ScriptedTracker {
    pose: Rc<Cell<HeadPose>>,
    queries: Rc<RefCell<Vec<(u64, DisplayOrientation)>>>,
    paused: Rc<Cell<bool>>,
}

impl ScriptedTracker {
    pub fn new(pose: HeadPose) -> Self {
        Self {
            pose: Rc::new(Cell::new(pose)),
            queries: Rc::default(),
            paused: Rc::default(),
        }
    }

    pub fn pose_handle(&self) -> Rc<Cell<HeadPose>> {
        self.pose.clone()
    }

    pub fn queries(&self) -> Rc<RefCell<Vec<(u64, DisplayOrientation)>>> {
        self.queries.clone()
    }

    pub fn paused_flag(&self) -> Rc<Cell<bool>> {
        self.paused.clone()
    }
}

impl HeadTracker for ScriptedTracker {
    fn pause(&mut self) {
        self.paused.set(true);
    }

    fn resume(&mut self) {
        self.paused.set(false);
    }

    fn pose(&mut self, timestamp_ns: u64, orientation: DisplayOrientation) -> HeadPose {
        self.queries.borrow_mut().push((timestamp_ns, orientation));
        self.pose.get()
    }
}

pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ns(&self) -> u64 {
        self.0
    }
}

/// Wraps [`ProfileLensFactory`] and logs lens lifetimes.
#[derive(Default)]
pub struct TracingLensFactory {
    pub events: Rc<RefCell<Vec<String>>>,
    serial: u32,
}

struct TracedLens {
    serial: u32,
    inner: Box<dyn LensDistortion>,
    events: Rc<RefCell<Vec<String>>>,
}

impl LensDistortion for TracedLens {
    fn distortion_mesh(&self, eye: Eye) -> &DistortionMesh {
        self.inner.distortion_mesh(eye)
    }

    fn eye_from_head_matrix(&self, eye: Eye) -> Mat4 {
        self.inner.eye_from_head_matrix(eye)
    }

    fn projection_matrix(&self, eye: Eye, z_near: f32, z_far: f32) -> Mat4 {
        self.inner.projection_matrix(eye, z_near, z_far)
    }
}

impl Drop for TracedLens {
    fn drop(&mut self) {
        self.events
            .borrow_mut()
            .push(format!("drop lens {}", self.serial));
    }
}

impl LensDistortionFactory for TracingLensFactory {
    fn create(
        &mut self,
        calibration: &DeviceCalibration,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<Box<dyn LensDistortion>> {
        let inner = ProfileLensFactory
            .create(calibration, screen_width, screen_height)
            .inspect_err(|_| self.events.borrow_mut().push("reject calibration".to_string()))?;
        self.serial += 1;
        self.events.borrow_mut().push(format!(
            "create lens {} {}x{}",
            self.serial, screen_width, screen_height
        ));
        Ok(Box::new(TracedLens {
            serial: self.serial,
            inner,
            events: self.events.clone(),
        }))
    }
}
