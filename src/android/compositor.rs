//! Mesh distortion compositor for the wgpu device.

use bytemuck::{Pod, Zeroable};
use log::{info, warn};
use wgpu::util::DeviceExt;

use super::gpu_device::{IndexedDraw, TexturedVertex, WgpuDevice};
use crate::compositor::{DistortionRenderer, DistortionRendererFactory};
use crate::gpu::{EyeTextureDescription, FramebufferId, ShaderSource, Viewport};
use crate::lens::{DistortionMesh, Eye};

const DISTORTION_SHADER: ShaderSource = ShaderSource {
    label: "distortion",
    wgsl: include_str!("../shaders/distortion.wgsl"),
    applies_mvp: false,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct EyeRegion {
    bounds: [f32; 4],
}

impl From<&EyeTextureDescription> for EyeRegion {
    fn from(eye: &EyeTextureDescription) -> Self {
        Self {
            bounds: [eye.left_u, eye.right_u, eye.top_v, eye.bottom_v],
        }
    }
}

struct EyeMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

pub struct MeshCompositor {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    meshes: [Option<EyeMesh>; 2],
}

pub fn mesh_compositors() -> DistortionRendererFactory<WgpuDevice> {
    Box::new(|gpu: &mut WgpuDevice| {
        Box::new(MeshCompositor::new(gpu)) as Box<dyn DistortionRenderer<WgpuDevice>>
    })
}

impl MeshCompositor {
    pub fn new(gpu: &mut WgpuDevice) -> Self {
        let device = gpu.device();

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Distortion Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(DISTORTION_SHADER.label),
            source: wgpu::ShaderSource::Wgsl(DISTORTION_SHADER.wgsl.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Distortion Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Distortion Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[TexturedVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.surface_format(),
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        info!("Distortion compositor created");
        Self {
            pipeline,
            layout,
            meshes: [None, None],
        }
    }
}

impl DistortionRenderer<WgpuDevice> for MeshCompositor {
    fn set_mesh(&mut self, gpu: &mut WgpuDevice, mesh: &DistortionMesh, eye: Eye) {
        let vertices: Vec<TexturedVertex> = mesh
            .vertices
            .iter()
            .zip(&mesh.uvs)
            .map(|(position, uv)| TexturedVertex {
                position: *position,
                uv: *uv,
            })
            .collect();

        let device = gpu.device();
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Distortion Mesh Vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Distortion Mesh Indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        self.meshes[eye.index()] = Some(EyeMesh {
            vertices,
            indices,
            index_count: mesh.indices.len() as u32,
        });
    }

    fn render_eye_to_display(
        &mut self,
        gpu: &mut WgpuDevice,
        target: FramebufferId,
        viewport: Viewport,
        left_eye: &EyeTextureDescription,
        right_eye: &EyeTextureDescription,
    ) {
        let mut bind_groups = Vec::with_capacity(2);
        for (eye, description) in [(Eye::Left, left_eye), (Eye::Right, right_eye)] {
            if self.meshes[eye.index()].is_none() {
                continue;
            }
            let Some(view) = gpu.texture_view(description.texture) else {
                warn!("Eye texture {:?} is gone, skipping {:?}", description.texture, eye);
                continue;
            };
            let region = gpu
                .device()
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Eye Region"),
                    contents: bytemuck::bytes_of(&EyeRegion::from(description)),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Distortion Bind Group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(gpu.sampler()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: region.as_entire_binding(),
                    },
                ],
            });
            bind_groups.push((eye, bind_group));
        }

        let draws: Vec<IndexedDraw<'_>> = bind_groups
            .iter()
            .filter_map(|(eye, bind_group)| {
                let mesh = self.meshes[eye.index()].as_ref()?;
                Some(IndexedDraw {
                    vertices: &mesh.vertices,
                    indices: &mesh.indices,
                    index_count: mesh.index_count,
                    bind_group,
                })
            })
            .collect();

        gpu.draw_indexed_meshes(target, viewport, &self.pipeline, &draws);
    }

    fn release(&mut self, _gpu: &mut WgpuDevice) {
        self.meshes = [None, None];
    }
}
