//! GPU device abstraction and frame resource lifecycle
//!
//! [`GpuDevice`] is a small GL-shaped command surface: objects are named by
//! non-zero ids and 0 always means "nothing". The Android build backs it
//! with wgpu; tests back it with a recording fake.

use glam::Mat4;
use log::{debug, error};

use crate::error::Error;

macro_rules! gpu_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: Self = Self(0);

            pub fn is_none(self) -> bool {
                self.0 == 0
            }
        }
    };
}

gpu_id!(TextureId);
gpu_id!(RenderbufferId);
gpu_id!(
    /// `FramebufferId::NONE` is the display surface.
    FramebufferId
);
gpu_id!(ProgramId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Clips this bottom-left-origin rectangle to a `width` x `height`
    /// target and re-expresses it with a top-left origin.
    ///
    /// `None` if nothing of it is left on the target.
    pub fn top_left_within(&self, width: u32, height: u32) -> Option<Viewport> {
        let x0 = self.x.max(0) as u32;
        let y0 = self.y.max(0) as u32;
        let x1 = (self.x as i64 + self.width as i64).clamp(0, width as i64) as u32;
        let y1 = (self.y as i64 + self.height as i64).clamp(0, height as i64) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Viewport::new(x0 as i32, (height - y1) as i32, x1 - x0, y1 - y0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// src * src_alpha + dst * (1 - src_alpha)
    Alpha,
}

/// Fixed-function state for subsequent draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub depth_test: bool,
    pub cull_face: bool,
    pub scissor_test: bool,
    pub blend: Option<BlendMode>,
}

impl RenderState {
    /// State the eye passes run with.
    pub const PASSTHROUGH: Self = Self {
        depth_test: true,
        cull_face: true,
        scissor_test: false,
        blend: Some(BlendMode::Alpha),
    };
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: false,
            cull_face: false,
            scissor_test: false,
            blend: None,
        }
    }
}

/// One eye's region of a shared render texture, handed to the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EyeTextureDescription {
    pub texture: TextureId,
    pub left_u: f32,
    pub right_u: f32,
    pub top_v: f32,
    pub bottom_v: f32,
}

/// A WGSL module exposing `vs_main` and `fs_main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: &'static str,
    pub wgsl: &'static str,
    /// Whether `vs_main` multiplies positions by the bound MVP.
    pub applies_mvp: bool,
}

/// A 4-vertex triangle strip sampling `texture`.
#[derive(Debug, Clone, Copy)]
pub struct QuadDraw<'a> {
    pub program: ProgramId,
    pub texture: TextureId,
    pub positions: &'a [f32; 8],
    pub uvs: &'a [f32; 8],
    /// Uniform for the program. `None` binds identity.
    pub mvp: Option<Mat4>,
}

pub trait GpuDevice {
    /// RGB color texture usable as a framebuffer attachment.
    fn create_render_texture(&mut self, width: u32, height: u32) -> TextureId;
    /// Camera-fed texture; contents are supplied by the platform.
    fn create_external_texture(&mut self) -> TextureId;
    fn create_depth_renderbuffer(&mut self, width: u32, height: u32) -> RenderbufferId;
    fn create_framebuffer(&mut self, color: TextureId, depth: RenderbufferId) -> FramebufferId;
    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId, Error>;

    fn delete_texture(&mut self, id: TextureId);
    fn delete_renderbuffer(&mut self, id: RenderbufferId);
    fn delete_framebuffer(&mut self, id: FramebufferId);
    fn delete_program(&mut self, id: ProgramId);

    fn bind_framebuffer(&mut self, id: FramebufferId);
    fn apply_render_state(&mut self, state: &RenderState);
    /// Clears color and depth of the bound framebuffer.
    fn clear(&mut self);
    fn set_viewport(&mut self, viewport: Viewport);
    fn draw_quad(&mut self, draw: &QuadDraw<'_>);

    /// Pops the oldest pending error code, if any (glGetError semantics).
    fn take_error(&mut self) -> Option<u32>;
}

/// Drains and logs pending GPU errors under `label`. Never fatal.
///
/// Returns `false` if anything was reported.
pub fn check_gpu<G: GpuDevice + ?Sized>(gpu: &mut G, label: &str) -> bool {
    let mut clean = true;
    while let Some(code) = gpu.take_error() {
        let err = Error::Gpu {
            label: label.to_string(),
            code,
        };
        error!("{}", err);
        clean = false;
    }
    clean
}

/// Offscreen target both eyes render into, sized to the screen.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBufferSet {
    pub texture: TextureId,
    pub depth: RenderbufferId,
    pub framebuffer: FramebufferId,
    pub width: u32,
    pub height: u32,
    pub left_eye: EyeTextureDescription,
    pub right_eye: EyeTextureDescription,
}

impl FrameBufferSet {
    pub fn eye(&self, eye: crate::lens::Eye) -> &EyeTextureDescription {
        match eye {
            crate::lens::Eye::Left => &self.left_eye,
            crate::lens::Eye::Right => &self.right_eye,
        }
    }
}

/// Owns at most one [`FrameBufferSet`]. Rebuilt whole, never patched.
#[derive(Debug, Default)]
pub struct FrameResources {
    current: Option<FrameBufferSet>,
}

impl FrameResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&FrameBufferSet> {
        self.current.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    /// Tears down any previous set, then builds a new one at `width` x `height`.
    pub fn allocate<G: GpuDevice + ?Sized>(&mut self, gpu: &mut G, width: u32, height: u32) -> &FrameBufferSet {
        debug!("Allocating frame resources {}x{}", width, height);
        self.release(gpu);

        let texture = gpu.create_render_texture(width, height);
        let depth = gpu.create_depth_renderbuffer(width, height);
        check_gpu(gpu, "Create Render buffer");
        let framebuffer = gpu.create_framebuffer(texture, depth);

        let left_eye = EyeTextureDescription {
            texture,
            left_u: 0.0,
            right_u: 0.5,
            top_v: 1.0,
            bottom_v: 0.0,
        };
        let right_eye = EyeTextureDescription {
            left_u: 0.5,
            right_u: 1.0,
            ..left_eye
        };

        check_gpu(gpu, "GlSetup");
        self.current.insert(FrameBufferSet {
            texture,
            depth,
            framebuffer,
            width,
            height,
            left_eye,
            right_eye,
        })
    }

    /// No-op when nothing is allocated.
    pub fn release<G: GpuDevice + ?Sized>(&mut self, gpu: &mut G) {
        let Some(set) = self.current.take() else {
            return;
        };
        gpu.delete_renderbuffer(set.depth);
        gpu.delete_framebuffer(set.framebuffer);
        gpu.delete_texture(set.texture);
        check_gpu(gpu, "GlTeardown");
    }
}
