//! Passthrough renderer variants
//!
//! All of them draw the camera texture onto the passthrough quad. The quad's
//! vertices are clip-space coordinates for `Shader` and `Direct`; only the
//! `Projected` program places it in the scene with the per-eye transform.

use glam::Mat4;
use log::info;

use crate::config::PassthroughVariant;
use crate::error::Result;
use crate::gpu::{check_gpu, GpuDevice, ProgramId, QuadDraw, ShaderSource, TextureId};
use crate::quad::PassthroughQuad;

pub const SHADER_PASSTHROUGH: ShaderSource = ShaderSource {
    label: "passthrough",
    wgsl: include_str!("shaders/passthrough.wgsl"),
    applies_mvp: false,
};

pub const PROJECTED_PASSTHROUGH: ShaderSource = ShaderSource {
    label: "projected passthrough",
    wgsl: include_str!("shaders/projected.wgsl"),
    applies_mvp: true,
};

pub const DIRECT_PASSTHROUGH: ShaderSource = ShaderSource {
    label: "direct passthrough",
    wgsl: include_str!("shaders/direct.wgsl"),
    applies_mvp: false,
};

pub trait PassthroughRenderer<G: GpuDevice + ?Sized> {
    /// Builds GPU programs. Must run on the GPU thread once a context exists.
    fn init(&mut self, gpu: &mut G) -> Result<()>;

    fn is_ready(&self) -> bool;

    fn draw(&mut self, gpu: &mut G, quad: &PassthroughQuad, camera: TextureId, mvp: Mat4);

    fn release(&mut self, gpu: &mut G);
}

pub fn passthrough_renderer<G: GpuDevice + ?Sized>(
    variant: PassthroughVariant,
) -> Box<dyn PassthroughRenderer<G>> {
    match variant {
        PassthroughVariant::Shader => Box::new(ShaderPassthrough::new(SHADER_PASSTHROUGH)),
        PassthroughVariant::Projected => Box::new(ShaderPassthrough::new(PROJECTED_PASSTHROUGH)),
        PassthroughVariant::Direct => Box::new(DirectPassthrough::default()),
    }
}

/// Program-based renderer; the eye's MVP is bound as its uniform.
#[derive(Debug)]
pub struct ShaderPassthrough {
    source: ShaderSource,
    program: ProgramId,
}

impl ShaderPassthrough {
    pub fn new(source: ShaderSource) -> Self {
        Self {
            source,
            program: ProgramId::NONE,
        }
    }
}

impl<G: GpuDevice + ?Sized> PassthroughRenderer<G> for ShaderPassthrough {
    fn init(&mut self, gpu: &mut G) -> Result<()> {
        if !self.program.is_none() {
            gpu.delete_program(self.program);
        }
        self.program = gpu.create_program(&self.source)?;
        info!("{} program ready: {:?}", self.source.label, self.program);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.program.is_none()
    }

    fn draw(&mut self, gpu: &mut G, quad: &PassthroughQuad, camera: TextureId, mvp: Mat4) {
        gpu.draw_quad(&QuadDraw {
            program: self.program,
            texture: camera,
            positions: quad.vertices(),
            uvs: quad.uvs(),
            mvp: Some(mvp),
        });
        check_gpu(gpu, "DrawPassthrough");
    }

    fn release(&mut self, gpu: &mut G) {
        if self.program.is_none() {
            return;
        }
        gpu.delete_program(self.program);
        self.program = ProgramId::NONE;
    }
}

/// Screen-aligned quad-texture renderer; ignores the eye transform.
#[derive(Debug, Default)]
pub struct DirectPassthrough {
    program: ProgramId,
}

impl<G: GpuDevice + ?Sized> PassthroughRenderer<G> for DirectPassthrough {
    fn init(&mut self, gpu: &mut G) -> Result<()> {
        if !self.program.is_none() {
            gpu.delete_program(self.program);
        }
        self.program = gpu.create_program(&DIRECT_PASSTHROUGH)?;
        info!("Direct passthrough program ready: {:?}", self.program);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.program.is_none()
    }

    fn draw(&mut self, gpu: &mut G, quad: &PassthroughQuad, camera: TextureId, _mvp: Mat4) {
        gpu.draw_quad(&QuadDraw {
            program: self.program,
            texture: camera,
            positions: quad.vertices(),
            uvs: quad.uvs(),
            mvp: None,
        });
        check_gpu(gpu, "DrawPassthrough");
    }

    fn release(&mut self, gpu: &mut G) {
        if self.program.is_none() {
            return;
        }
        gpu.delete_program(self.program);
        self.program = ProgramId::NONE;
    }
}
