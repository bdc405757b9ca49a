use super::light::MAX_LIGHTS;
use super::shader::{compile_shader, link_pipeline};
use crate::error::RenderError;

/// Fixed vertex attribute layout for every model in this subsystem:
/// slot 0 carries 2D positions, slot 1 carries 2D tex coords. Two separate
/// buffers so a model can swap in a cached tex-coord buffer per frame.
pub fn vertex_buffer_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
    const POSITION: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
    const TEX_COORD: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];
    [
        wgpu::VertexBufferLayout {
            array_stride: 8,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION,
        },
        wgpu::VertexBufferLayout {
            array_stride: 8,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &TEX_COORD,
        },
    ]
}

/// Frame-wide uniform state: the external camera's view-projection and the
/// day/night clock. Layout matches `Globals` in `shaders/world.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalsUniform {
    /// Column-major view-projection supplied by the external camera.
    pub view_proj: [[f32; 4]; 4],
    /// Day/night presence in [0, 1]; 1 is full day.
    pub sun_presence: f32,
    pub _pad: [f32; 3],
}

impl GlobalsUniform {
    /// Plain orthographic projection mapping pixel coords `[0..w] × [0..h]`
    /// to clip space — the default before the external camera supplies one.
    pub fn identity_ortho(width: f32, height: f32) -> Self {
        let sx = 2.0 / width;
        let sy = -2.0 / height;
        Self {
            view_proj: [
                [sx, 0.0, 0.0, 0.0],
                [0.0, sy, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [-1.0, 1.0, 0.0, 1.0],
            ],
            sun_presence: 1.0,
            _pad: [0.0; 3],
        }
    }
}

/// Size in bytes of the light array uniform.
pub const LIGHTS_BUFFER_SIZE: u64 =
    (MAX_LIGHTS * std::mem::size_of::<super::light::GpuLight>()) as u64;

pub struct WorldPipeline {
    pub render_pipeline: wgpu::RenderPipeline,
    pub globals_bind_group_layout: wgpu::BindGroupLayout,
    pub material_bind_group_layout: wgpu::BindGroupLayout,
}

pub fn create_world_pipeline(
    device: &wgpu::Device,
    surface_format: wgpu::TextureFormat,
) -> Result<WorldPipeline, RenderError> {
    let shader = compile_shader(device, "world_shader", include_str!("shaders/world.wgsl"))?;

    let globals_bind_group_layout =
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("globals_bgl"),
            entries: &[
                // Globals: view-projection + sun presence.
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Active light array, rebuilt each frame.
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

    let material_bind_group_layout =
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("material_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("world_pipeline_layout"),
        bind_group_layouts: &[&globals_bind_group_layout, &material_bind_group_layout],
        ..Default::default()
    });

    let render_pipeline = link_pipeline(device, "world_pipeline", |device| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("world_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &vertex_buffer_layouts(),
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    })?;

    Ok(WorldPipeline {
        render_pipeline,
        globals_bind_group_layout,
        material_bind_group_layout,
    })
}
