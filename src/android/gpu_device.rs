//! wgpu-backed [`GpuDevice`]
//!
//! GL-style ids map onto wgpu objects held in tables. Every draw and clear is
//! recorded as its own render pass into one encoder per frame; [`WgpuDevice::present`]
//! submits it and flips the surface.
//!
//! Two conventions differ from GL and are corrected here: clip depth
//! (GL [-w, w], wgpu [0, w]) and the viewport origin (GL bottom-left,
//! wgpu top-left).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use log::{error, info, warn};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::util::DeviceExt;
use wgpu::{
    Backends, BindGroup, BindGroupLayout, Buffer, Device, DeviceDescriptor, Instance,
    InstanceDescriptor, PipelineLayout, Queue, RenderPipeline, Sampler, Surface,
    SurfaceConfiguration, SurfaceTargetUnsafe, TextureFormat, TextureUsages, TextureView,
};
use winit::window::Window;

use crate::error::{Error, Result};
use crate::gpu::{
    BlendMode, FramebufferId, GpuDevice, ProgramId, QuadDraw, RenderState, RenderbufferId,
    ShaderSource, TextureId, Viewport,
};

const GL_INVALID_VALUE: u32 = 0x0501;
const GL_INVALID_OPERATION: u32 = 0x0502;
const GL_OUT_OF_MEMORY: u32 = 0x0505;
const GL_INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;

const RENDER_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
const CAMERA_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24Plus;

/// Remaps GL clip depth onto wgpu's: z' = 0.5 z + 0.5 w.
const GL_TO_WGPU_CLIP: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.5, 0.0, //
    0.0, 0.0, 0.5, 1.0,
]);

pub const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Interleaved position + uv, shared by the quad and the distortion meshes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl TexturedVertex {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<TexturedVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MvpUniform {
    mvp: [[f32; 4]; 4],
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: TextureView,
}

impl TextureEntry {
    fn new(device: &Device, label: &str, width: u32, height: u32, format: TextureFormat, usage: TextureUsages) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

#[derive(Debug, Clone, Copy)]
struct FramebufferEntry {
    color: TextureId,
    depth: RenderbufferId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    state: RenderState,
    format: TextureFormat,
    depth: bool,
}

/// Resolved attachments for the bound framebuffer.
struct Target<'a> {
    color: &'a TextureView,
    depth: Option<&'a TextureView>,
    width: u32,
    height: u32,
}

/// One indexed mesh draw for [`WgpuDevice::draw_indexed_meshes`].
pub struct IndexedDraw<'a> {
    pub vertices: &'a Buffer,
    pub indices: &'a Buffer,
    pub index_count: u32,
    pub bind_group: &'a BindGroup,
}

pub struct WgpuDevice {
    #[allow(dead_code)]
    window: Arc<Window>,
    surface: Surface<'static>,
    device: Device,
    queue: Queue,
    config: SurfaceConfiguration,

    mvp_layout: BindGroupLayout,
    texture_layout: BindGroupLayout,
    quad_pipeline_layout: PipelineLayout,
    sampler: Sampler,

    textures: HashMap<TextureId, TextureEntry>,
    depth_buffers: HashMap<RenderbufferId, TextureEntry>,
    framebuffers: HashMap<FramebufferId, FramebufferEntry>,
    programs: HashMap<ProgramId, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
    next_id: u32,

    errors: Arc<Mutex<VecDeque<u32>>>,
    bound: FramebufferId,
    viewport: Viewport,
    state: RenderState,

    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<(wgpu::SurfaceTexture, TextureView)>,
}

impl WgpuDevice {
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = Instance::new(&InstanceDescriptor {
            backends: Backends::VULKAN,
            ..Default::default()
        });

        let window_handle = window
            .window_handle()
            .map_err(|e| Error::Platform(format!("window handle: {e}")))?
            .as_raw();
        let display_handle = window
            .display_handle()
            .map_err(|e| Error::Platform(format!("display handle: {e}")))?
            .as_raw();
        // Safety: the window outlives the surface; both live in this struct.
        let surface = unsafe {
            instance.create_surface_unsafe(SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle,
                raw_window_handle: window_handle,
            })
        }
        .map_err(|e| Error::Platform(format!("surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Error::Platform("no GPU adapter".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("PhoneXR Device"),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| Error::Platform(format!("device: {e}")))?;

        let errors: Arc<Mutex<VecDeque<u32>>> = Arc::default();
        let sink = errors.clone();
        device.on_uncaptured_error(Box::new(move |e| {
            let code = match e {
                wgpu::Error::OutOfMemory { .. } => GL_OUT_OF_MEMORY,
                _ => GL_INVALID_OPERATION,
            };
            error!("wgpu: {}", e);
            if let Ok(mut pending) = sink.lock() {
                pending.push_back(code);
            }
        }));

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| Error::Platform("surface has no formats".to_string()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!("Surface configured {}x{} {:?}", config.width, config.height, format);

        let mvp_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("MVP Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Camera Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        // Every passthrough program shares this layout; only the projected
        // one reads group 0.
        let quad_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Passthrough Pipeline Layout"),
            bind_group_layouts: &[&mvp_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            mvp_layout,
            texture_layout,
            quad_pipeline_layout,
            sampler,
            textures: HashMap::new(),
            depth_buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            next_id: 0,
            errors,
            bound: FramebufferId::NONE,
            viewport: Viewport::full(size.width, size.height),
            state: RenderState::default(),
            encoder: None,
            frame: None,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn surface_format(&self) -> TextureFormat {
        self.config.format
    }

    pub fn texture_view(&self, id: TextureId) -> Option<&TextureView> {
        self.textures.get(&id).map(|t| &t.view)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        // A frame acquired at the old size must not be presented.
        self.frame = None;
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Uploads one RGBA camera frame, resizing the texture if needed.
    pub fn update_camera_texture(&mut self, id: TextureId, rgba: &[u8], width: u32, height: u32) {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() < expected {
            warn!(
                "Dropping camera frame {}x{} with {} bytes",
                width,
                height,
                rgba.len()
            );
            return;
        }

        let needs_new_texture = self
            .textures
            .get(&id)
            .map(|t| {
                let size = t.texture.size();
                size.width != width || size.height != height
            })
            .unwrap_or(true);

        if needs_new_texture {
            info!("Camera texture {:?} now {}x{}", id, width, height);
            let entry = TextureEntry::new(
                &self.device,
                "Camera Texture",
                width,
                height,
                CAMERA_FORMAT,
                TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            );
            self.textures.insert(id, entry);
        }

        if let Some(entry) = self.textures.get(&id) {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &entry.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &rgba[..expected],
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    /// Submits everything recorded this frame and presents the display.
    pub fn present(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        if let Some((frame, _view)) = self.frame.take() {
            frame.present();
        }
    }

    /// Clears `target`, then draws `draws` into `viewport` with `pipeline`.
    pub fn draw_indexed_meshes(
        &mut self,
        target: FramebufferId,
        viewport: Viewport,
        pipeline: &RenderPipeline,
        draws: &[IndexedDraw<'_>],
    ) {
        if !self.prepare_target(target) {
            return;
        }
        let mut encoder = self.take_encoder();
        if let Some(target) = self.resolve_target(target) {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Distortion Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some((x, y, w, h)) = pass_viewport(viewport, target.width, target.height) {
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                pass.set_pipeline(pipeline);
                for draw in draws {
                    pass.set_bind_group(0, draw.bind_group, &[]);
                    pass.set_vertex_buffer(0, draw.vertices.slice(..));
                    pass.set_index_buffer(draw.indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..draw.index_count, 0, 0..1);
                }
            }
        }
        self.encoder = Some(encoder);
    }

    fn issue(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn report(&self, code: u32) {
        if let Ok(mut pending) = self.errors.lock() {
            pending.push_back(code);
        }
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        })
    }

    /// Acquires the swapchain image when the display is the target.
    fn prepare_target(&mut self, target: FramebufferId) -> bool {
        if !target.is_none() {
            if self.framebuffers.contains_key(&target) {
                return true;
            }
            self.report(GL_INVALID_FRAMEBUFFER_OPERATION);
            return false;
        }
        if self.frame.is_some() {
            return true;
        }
        match self.surface.get_current_texture() {
            Ok(frame) => {
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                self.frame = Some((frame, view));
                true
            }
            Err(e) => {
                warn!("Surface frame unavailable: {}", e);
                self.surface.configure(&self.device, &self.config);
                self.report(GL_INVALID_FRAMEBUFFER_OPERATION);
                false
            }
        }
    }

    fn resolve_target(&self, target: FramebufferId) -> Option<Target<'_>> {
        if target.is_none() {
            let (_, view) = self.frame.as_ref()?;
            return Some(Target {
                color: view,
                depth: None,
                width: self.config.width,
                height: self.config.height,
            });
        }
        let entry = self.framebuffers.get(&target)?;
        let color = self.textures.get(&entry.color)?;
        let size = color.texture.size();
        Some(Target {
            color: &color.view,
            depth: self.depth_buffers.get(&entry.depth).map(|d| &d.view),
            width: size.width,
            height: size.height,
        })
    }

    fn target_format(&self, target: FramebufferId) -> Option<(TextureFormat, bool)> {
        if target.is_none() {
            return Some((self.config.format, false));
        }
        let entry = self.framebuffers.get(&target)?;
        let color = self.textures.get(&entry.color)?;
        Some((
            color.texture.format(),
            self.depth_buffers.contains_key(&entry.depth),
        ))
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> bool {
        if self.pipelines.contains_key(&key) {
            return true;
        }
        let Some(module) = self.programs.get(&key.program) else {
            return false;
        };
        let pipeline = build_quad_pipeline(&self.device, &self.quad_pipeline_layout, module, key);
        self.pipelines.insert(key, pipeline);
        true
    }
}

fn build_quad_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    module: &wgpu::ShaderModule,
    key: PipelineKey,
) -> RenderPipeline {
    let state = key.state;
    let blend = state.blend.map(|mode| match mode {
        BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
    });
    let depth_stencil = key.depth.then(|| wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: state.depth_test,
        depth_compare: if state.depth_test {
            wgpu::CompareFunction::Less
        } else {
            wgpu::CompareFunction::Always
        },
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    // Scissor is never enabled by this app, so it has no pipeline state.
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Passthrough Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[TexturedVertex::layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: key.format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: state.cull_face.then_some(wgpu::Face::Back),
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// GL viewport (bottom-left origin) to a wgpu viewport clamped to the target.
fn pass_viewport(viewport: Viewport, target_width: u32, target_height: u32) -> Option<(f32, f32, f32, f32)> {
    let rect = viewport.top_left_within(target_width, target_height)?;
    Some((rect.x as f32, rect.y as f32, rect.width as f32, rect.height as f32))
}

impl GpuDevice for WgpuDevice {
    fn create_render_texture(&mut self, width: u32, height: u32) -> TextureId {
        let id = TextureId(self.issue());
        let entry = TextureEntry::new(
            &self.device,
            "Eye Render Texture",
            width,
            height,
            RENDER_FORMAT,
            TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
        );
        self.textures.insert(id, entry);
        id
    }

    fn create_external_texture(&mut self) -> TextureId {
        let id = TextureId(self.issue());
        let entry = TextureEntry::new(
            &self.device,
            "Camera Texture (Placeholder)",
            1,
            1,
            CAMERA_FORMAT,
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        );
        self.textures.insert(id, entry);
        id
    }

    fn create_depth_renderbuffer(&mut self, width: u32, height: u32) -> RenderbufferId {
        let id = RenderbufferId(self.issue());
        let entry = TextureEntry::new(
            &self.device,
            "Eye Depth Buffer",
            width,
            height,
            DEPTH_FORMAT,
            TextureUsages::RENDER_ATTACHMENT,
        );
        self.depth_buffers.insert(id, entry);
        id
    }

    fn create_framebuffer(&mut self, color: TextureId, depth: RenderbufferId) -> FramebufferId {
        if !self.textures.contains_key(&color) {
            self.report(GL_INVALID_VALUE);
        }
        let id = FramebufferId(self.issue());
        self.framebuffers.insert(id, FramebufferEntry { color, depth });
        id
    }

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Wgsl(source.wgsl.into()),
        });
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::Shader {
                label: source.label,
                message: e.to_string(),
            });
        }
        let id = ProgramId(self.issue());
        self.programs.insert(id, module);
        Ok(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn delete_renderbuffer(&mut self, id: RenderbufferId) {
        self.depth_buffers.remove(&id);
    }

    fn delete_framebuffer(&mut self, id: FramebufferId) {
        self.framebuffers.remove(&id);
        if self.bound == id {
            self.bound = FramebufferId::NONE;
        }
    }

    fn delete_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        self.pipelines.retain(|key, _| key.program != id);
    }

    fn bind_framebuffer(&mut self, id: FramebufferId) {
        if !id.is_none() && !self.framebuffers.contains_key(&id) {
            self.report(GL_INVALID_OPERATION);
            return;
        }
        self.bound = id;
    }

    fn apply_render_state(&mut self, state: &RenderState) {
        self.state = *state;
    }

    fn clear(&mut self) {
        let bound = self.bound;
        if !self.prepare_target(bound) {
            return;
        }
        let mut encoder = self.take_encoder();
        if let Some(target) = self.resolve_target(bound) {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: target.depth.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.encoder = Some(encoder);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) {
        let bound = self.bound;
        if !self.prepare_target(bound) {
            return;
        }
        let Some((format, depth)) = self.target_format(bound) else {
            self.report(GL_INVALID_FRAMEBUFFER_OPERATION);
            return;
        };
        let key = PipelineKey {
            program: draw.program,
            state: self.state,
            format,
            depth,
        };
        if !self.ensure_pipeline(key) {
            self.report(GL_INVALID_OPERATION);
            return;
        }
        let Some(texture) = self.textures.get(&draw.texture) else {
            self.report(GL_INVALID_VALUE);
            return;
        };

        let vertices: Vec<TexturedVertex> = draw
            .positions
            .chunks_exact(2)
            .zip(draw.uvs.chunks_exact(2))
            .map(|(p, uv)| TexturedVertex {
                position: [p[0], p[1]],
                uv: [uv[0], uv[1]],
            })
            .collect();
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let mvp = draw.mvp.map_or(Mat4::IDENTITY, |m| GL_TO_WGPU_CLIP * m);
        let mvp_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("MVP Buffer"),
            contents: bytemuck::bytes_of(&MvpUniform {
                mvp: mvp.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mvp_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("MVP Bind Group"),
            layout: &self.mvp_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: mvp_buffer.as_entire_binding(),
            }],
        });
        let texture_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self.take_encoder();
        if let (Some(target), Some(pipeline)) = (self.resolve_target(bound), self.pipelines.get(&key)) {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Eye Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: target.depth.filter(|_| depth).map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some((x, y, w, h)) = pass_viewport(self.viewport, target.width, target.height) {
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &mvp_bind_group, &[]);
                pass.set_bind_group(1, &texture_bind_group, &[]);
                pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                pass.draw(0..4, 0..1);
            }
        }
        self.encoder = Some(encoder);
    }

    fn take_error(&mut self) -> Option<u32> {
        self.errors.lock().ok()?.pop_front()
    }
}
