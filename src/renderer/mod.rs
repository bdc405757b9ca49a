pub mod animation;
pub mod bake;
pub mod light;
pub mod material;
pub mod model;
pub mod pipeline;
pub mod shader;
pub mod texture;

use std::sync::Arc;

use image::{Rgba, RgbaImage};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use animation::{AnimationRegistry, TexCoordCache};
use bake::{BakeJob, BakePass};
use light::{ActiveLights, DayNightCycle};
use material::{LightSourceMaterial, Material, MaterialContext, material_uniform_layout};
use model::Model;
use pipeline::{GlobalsUniform, LIGHTS_BUFFER_SIZE, WorldPipeline, create_world_pipeline};
use shader::UniformLayout;
use texture::Texture;

use crate::error::RenderError;

// ── Draw list ────────────────────────────────────────────────────────────────

/// The material half of a draw command.
pub enum MaterialRef<'a> {
    Plain(&'a Material),
    /// Binds the material and registers its light for this frame.
    Lit(&'a LightSourceMaterial),
}

/// One quad to draw this frame. Commands draw in slice order with alpha
/// blending, so the caller owns the back-to-front sort.
pub struct DrawCommand<'a> {
    pub model: &'a Model,
    pub material: MaterialRef<'a>,
    /// Replacement tex-coord buffer for this draw, usually a cached
    /// animation frame. `None` uses the model's own tex coords.
    pub tex_coords: Option<&'a wgpu::Buffer>,
}

// ── Renderer ─────────────────────────────────────────────────────────────────

/// Owns the GPU connection and everything shared across draws: the world
/// pipeline, the bake pass, the animation registry, the tex-coord cache,
/// the day/night clock, and the per-frame light list.
pub struct Renderer {
    pub window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    world_pipeline: WorldPipeline,
    bake_pass: BakePass,
    /// Nearest-neighbor sampler shared by every material; pixel art smears
    /// under linear magnification.
    sampler: wgpu::Sampler,
    /// 1×1 white texture bound when a material has no texture of its own.
    fallback_texture: Texture,
    material_uniforms: UniformLayout,
    pub tex_coords: TexCoordCache,
    pub animations: AnimationRegistry,
    lights: ActiveLights,
    day_night: DayNightCycle,
    /// Seconds since startup, drives light flicker.
    time: f32,
    globals: GlobalsUniform,
    globals_buffer: wgpu::Buffer,
    lights_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
}

impl Renderer {
    /// Connect to the GPU and build every shared pipeline object.
    ///
    /// `day_length` is the full day/night period in seconds; `start_time`
    /// positions the clock within it (0 is midnight).
    pub async fn new(
        window: Arc<Window>,
        day_length: f32,
        start_time: f32,
    ) -> Result<Self, RenderError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|e| RenderError::GpuAllocation(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await
            .map_err(|_| RenderError::NoAdapter)?;
        log::info!("adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await
            .map_err(|e| RenderError::DeviceRequest(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps.formats[0];

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let world_pipeline = create_world_pipeline(&device, format)?;
        let bake_pass = BakePass::new(&device, &world_pipeline.material_bind_group_layout)?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("world_sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let white = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let fallback_texture = Texture::from_rgba(&device, &queue, &white, "fallback_white");

        // Initialised to the identity ortho so the first frame looks correct
        // even before the caller supplies a camera matrix.
        let globals = GlobalsUniform::identity_ortho(config.width as f32, config.height as f32);
        let globals_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("globals_buffer"),
            contents: bytemuck::cast_slice(std::slice::from_ref(&globals)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let lights_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lights_buffer"),
            size: LIGHTS_BUFFER_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let globals_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("globals_bg"),
            layout: &world_pipeline.globals_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: globals_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: lights_buffer.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            world_pipeline,
            bake_pass,
            sampler,
            fallback_texture,
            material_uniforms: material_uniform_layout(),
            tex_coords: TexCoordCache::new(),
            animations: AnimationRegistry::new(),
            lights: ActiveLights::new(),
            day_night: DayNightCycle::new(day_length, start_time),
            time: 0.0,
            globals,
            globals_buffer,
            lights_buffer,
            globals_bind_group,
        })
    }

    /// Everything a [`Material`] needs at construction time.
    pub fn material_context(&self) -> MaterialContext<'_> {
        MaterialContext {
            device: &self.device,
            layout: &self.world_pipeline.material_bind_group_layout,
            uniform_layout: &self.material_uniforms,
            sampler: &self.sampler,
            fallback_view: &self.fallback_texture.view,
        }
    }

    /// Decode and upload a PNG with a full mip chain.
    pub fn load_texture(&self, bytes: &[u8], source_label: &str) -> Result<Texture, RenderError> {
        Texture::from_bytes(&self.device, &self.queue, bytes, source_label)
    }

    /// Cached tex-coord buffer for one frame of a `(frame_count, flip)`
    /// strip; `InvalidFrame` past the end of the strip.
    pub fn frame_tex_coords(
        &mut self,
        frame_count: u32,
        frame: u32,
        flip: bool,
    ) -> Result<&wgpu::Buffer, RenderError> {
        self.tex_coords.frame_buffer(&self.device, frame_count, frame, flip)
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn day_night(&self) -> &DayNightCycle {
        &self.day_night
    }

    pub fn day_night_mut(&mut self) -> &mut DayNightCycle {
        &mut self.day_night
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Upload a new camera view-projection matrix.
    /// Call once per frame, after the camera ticks and before `render`.
    pub fn update_camera(&mut self, view_proj: [[f32; 4]; 4]) {
        self.globals.view_proj = view_proj;
    }

    /// Start a frame: advance the world clock, the day/night cycle, and every
    /// registered animation, and empty the light list for re-collection.
    pub fn begin_frame(&mut self, dt: f32) {
        self.time += dt;
        self.day_night.advance(dt);
        self.animations.advance_all(dt);
        self.lights.begin_frame();
    }

    /// Render one frame: every command in slice order, in a single pass over
    /// the swapchain, cleared to black.
    ///
    /// Lit materials push their lights while commands record; the light list
    /// uploads before submission, so every draw in the frame sees the full
    /// list regardless of command order.
    pub fn render(&mut self, draws: &[DrawCommand<'_>]) -> Result<(), RenderError> {
        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: None,
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_pipeline(&self.world_pipeline.render_pipeline);
            pass.set_bind_group(0, &self.globals_bind_group, &[]);

            for draw in draws {
                match &draw.material {
                    MaterialRef::Plain(material) => material.bind(&self.queue, &mut pass),
                    MaterialRef::Lit(material) => {
                        material.bind(&self.queue, &mut pass, &mut self.lights, self.time)
                    }
                }
                match draw.tex_coords {
                    Some(buffer) => draw.model.draw_with_tex_coords(&mut pass, buffer),
                    None => draw.model.draw(&mut pass),
                }
            }
        }

        // Buffer writes land before the command buffer executes, so staging
        // globals and lights here still feeds the pass recorded above.
        self.globals.sun_presence = self.day_night.sun_presence();
        self.queue.write_buffer(
            &self.globals_buffer,
            0,
            bytemuck::cast_slice(std::slice::from_ref(&self.globals)),
        );
        self.queue
            .write_buffer(&self.lights_buffer, 0, bytemuck::bytes_of(self.lights.slots()));

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }

    /// Composite `jobs` into one texture through the bake pass. Synchronous;
    /// meant for scene load, not the frame loop.
    pub fn bake(
        &self,
        jobs: &[BakeJob<'_>],
        width: u32,
        height: u32,
    ) -> Result<Texture, RenderError> {
        self.bake_pass.bake(&self.device, &self.queue, jobs, width, height)
    }

    /// Release renderer-owned GPU objects. Caller-owned models, materials
    /// and textures have their own `cleanup`.
    pub fn cleanup(&self) {
        self.fallback_texture.cleanup();
    }
}
