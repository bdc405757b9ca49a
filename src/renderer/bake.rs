use serde::Deserialize;

use super::material::Material;
use super::model::Model;
use super::shader::{UniformBlock, UniformLayout, UniformType, compile_shader, link_pipeline};
use super::texture::Texture;
use crate::error::RenderError;

// ── Fade math (pure, GPU-free) ───────────────────────────────────────────────

/// Edge along which a baked tile's alpha ramps to transparent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeDirection {
    #[default]
    None = 0,
    Left = 1,
    Right = 2,
    Above = 3,
    Below = 4,
}

/// Clamp the along-edge coordinate into `[thickness, dim - thickness]`.
/// When the edge is shorter than two thicknesses the range inverts, so it
/// collapses to the midpoint instead.
fn clamp_along_edge(v: f32, dim: f32, thickness: f32) -> f32 {
    if dim < 2.0 * thickness {
        dim / 2.0
    } else {
        v.clamp(thickness, dim - thickness)
    }
}

/// Alpha of the baked-tile fade at pixel `(px, py)` of a `w`×`h` target.
///
/// Without corners the alpha is a linear ramp along the fade axis: 0 at the
/// fading edge, 1 at the opposite edge. With corners, the distance to the
/// nearest point of a `thickness`-inset segment of the *opposite* edge drives
/// the ramp, which turns the fade region into a stadium shape — corners fade
/// radially instead of in an L. The two modes agree along the edge midline
/// of a square target.
///
/// Mirrored exactly by `shaders/bake.wgsl`; color channels pass through.
pub fn fade_alpha(dir: FadeDirection, corners: bool, w: f32, h: f32, px: f32, py: f32) -> f32 {
    if dir == FadeDirection::None {
        return 1.0;
    }
    if !corners {
        return match dir {
            FadeDirection::Left => px / w,
            FadeDirection::Right => 1.0 - px / w,
            FadeDirection::Above => py / h,
            FadeDirection::Below => 1.0 - py / h,
            FadeDirection::None => unreachable!(),
        }
        .clamp(0.0, 1.0);
    }

    let thickness = w.min(h);
    // Nearest point on the opaque edge (the one opposite the fade).
    let (ex, ey) = match dir {
        FadeDirection::Left => (w, clamp_along_edge(py, h, thickness)),
        FadeDirection::Right => (0.0, clamp_along_edge(py, h, thickness)),
        FadeDirection::Above => (clamp_along_edge(px, w, thickness), h),
        FadeDirection::Below => (clamp_along_edge(px, w, thickness), 0.0),
        FadeDirection::None => unreachable!(),
    };
    let d = ((px - ex).powi(2) + (py - ey).powi(2)).sqrt();
    (1.0 - d / thickness).clamp(0.0, 1.0)
}

// ── Bake pass ────────────────────────────────────────────────────────────────

/// Uniforms consumed by the bake fragment stage. Field names are the binding
/// contract with `shaders/bake.wgsl`.
pub fn bake_uniform_layout() -> UniformLayout {
    UniformLayout::new(&[
        ("fade_dir", UniformType::I32),
        ("corners", UniformType::I32),
        ("w", UniformType::F32),
        ("h", UniformType::F32),
    ])
}

/// Render-target extent for a bake request. Zero dimensions clamp to 1; the
/// fade uniforms must use the same extent as the target texture, or a
/// zero-sized request divides by zero in the fade shader.
fn bake_extent(width: u32, height: u32) -> (u32, u32) {
    (width.max(1), height.max(1))
}

/// One quad to composite into the baked output.
pub struct BakeJob<'a> {
    pub model: &'a Model,
    pub material: &'a Material,
    pub fade: FadeDirection,
    pub corners: bool,
}

/// Offline pass that composites many material-rendered quads into one shared
/// texture, so a static tile batch renders as a single draw afterwards.
pub struct BakePass {
    pipeline: wgpu::RenderPipeline,
    fade_bind_group_layout: wgpu::BindGroupLayout,
    uniform_layout: UniformLayout,
}

impl BakePass {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

    pub fn new(
        device: &wgpu::Device,
        material_bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Result<Self, RenderError> {
        let shader = compile_shader(device, "bake_shader", include_str!("shaders/bake.wgsl"))?;

        let fade_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("bake_fade_bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("bake_pipeline_layout"),
            bind_group_layouts: &[&fade_bind_group_layout, material_bind_group_layout],
            ..Default::default()
        });

        let pipeline = link_pipeline(device, "bake_pipeline", |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("bake_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &super::pipeline::vertex_buffer_layouts(),
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: Self::FORMAT,
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

        Ok(Self {
            pipeline,
            fade_bind_group_layout,
            uniform_layout: bake_uniform_layout(),
        })
    }

    /// Composite `jobs` into a fresh `width`×`height` texture and return it.
    ///
    /// Jobs draw in order with alpha blending, so later tiles seam-blend over
    /// earlier ones through their fade ramps. Runs synchronously; intended
    /// for scene load, not the frame loop.
    pub fn bake(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        jobs: &[BakeJob<'_>],
        width: u32,
        height: u32,
    ) -> Result<Texture, RenderError> {
        let (width, height) = bake_extent(width, height);
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("bake_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        // One fade uniform block per job. Bakes run offline, so building
        // these per call is fine.
        let mut fade_bind_groups = Vec::with_capacity(jobs.len());
        for job in jobs {
            let u_dir = self.uniform_layout.register_i32("fade_dir")?;
            let u_corners = self.uniform_layout.register_i32("corners")?;
            let u_w = self.uniform_layout.register_f32("w")?;
            let u_h = self.uniform_layout.register_f32("h")?;

            let mut block = UniformBlock::new(device, &self.uniform_layout, "bake_uniforms");
            block.set_i32(u_dir, job.fade as i32);
            block.set_i32(u_corners, job.corners as i32);
            block.set_f32(u_w, width as f32);
            block.set_f32(u_h, height as f32);
            block.upload(queue);

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("bake_fade_bg"),
                layout: &self.fade_bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: block.buffer().as_entire_binding(),
                }],
            });
            fade_bind_groups.push((block, bind_group));
        }

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("bake") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("bake_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_pipeline(&self.pipeline);
            for (job, (_block, fade_bg)) in jobs.iter().zip(&fade_bind_groups) {
                pass.set_bind_group(0, fade_bg, &[]);
                job.material.bind(queue, &mut pass);
                job.model.draw(&mut pass);
            }
        }
        queue.submit(std::iter::once(encoder.finish()));

        Ok(Texture::from_raw(target, width, height))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const W: f32 = 64.0;
    const H: f32 = 64.0;

    #[test]
    fn no_fade_direction_is_opaque_everywhere() {
        assert_eq!(fade_alpha(FadeDirection::None, false, W, H, 3.0, 60.0), 1.0);
        assert_eq!(fade_alpha(FadeDirection::None, true, W, H, 3.0, 60.0), 1.0);
    }

    #[test]
    fn left_fade_ramps_from_zero_to_one() {
        assert_eq!(fade_alpha(FadeDirection::Left, false, W, H, 0.0, 32.0), 0.0);
        assert_eq!(fade_alpha(FadeDirection::Left, false, W, H, W, 32.0), 1.0);
        let mid = fade_alpha(FadeDirection::Left, false, W, H, W / 2.0, 32.0);
        assert!((mid - 0.5).abs() < 1e-6);
    }

    #[test]
    fn right_fade_mirrors_left() {
        for i in 0..=8 {
            let px = W * i as f32 / 8.0;
            let left = fade_alpha(FadeDirection::Left, false, W, H, px, 10.0);
            let right = fade_alpha(FadeDirection::Right, false, W, H, W - px, 10.0);
            assert!((left - right).abs() < 1e-6, "mismatch at px={px}");
        }
    }

    #[test]
    fn vertical_fades_ramp_along_y() {
        assert_eq!(fade_alpha(FadeDirection::Above, false, W, H, 32.0, 0.0), 0.0);
        assert_eq!(fade_alpha(FadeDirection::Below, false, W, H, 32.0, 0.0), 1.0);
        assert_eq!(fade_alpha(FadeDirection::Above, false, W, H, 32.0, H), 1.0);
        assert_eq!(fade_alpha(FadeDirection::Below, false, W, H, 32.0, H), 0.0);
    }

    #[test]
    fn corner_mode_agrees_with_linear_on_square_edge_midline() {
        // For a square target the stadium fade and the plain ramp must agree
        // along the midline of the fade axis.
        for i in 0..=16 {
            let px = W * i as f32 / 16.0;
            let linear = fade_alpha(FadeDirection::Left, false, W, H, px, H / 2.0);
            let corner = fade_alpha(FadeDirection::Left, true, W, H, px, H / 2.0);
            assert!(
                (linear - corner).abs() < 1e-5,
                "disagreement at px={px}: linear={linear} corner={corner}"
            );
        }
    }

    #[test]
    fn corner_mode_fades_radially_at_corners() {
        // Bottom-left corner of a left fade: farther from the opaque right
        // edge's inset segment than the midline is, so strictly darker.
        let mid = fade_alpha(FadeDirection::Left, true, 256.0, 64.0, 200.0, 32.0);
        let corner = fade_alpha(FadeDirection::Left, true, 256.0, 64.0, 200.0, 0.0);
        assert!(corner < mid, "corner alpha {corner} should be below midline {mid}");
    }

    #[test]
    fn inverted_clamp_range_collapses_to_midpoint() {
        // dim < 2*thickness: the inset range [t, dim-t] is inverted, so the
        // along-edge coordinate must collapse to the midpoint, not panic or
        // produce a reversed clamp.
        assert_eq!(clamp_along_edge(5.0, 10.0, 10.0), 5.0);
        assert_eq!(clamp_along_edge(0.0, 10.0, 10.0), 5.0);
        assert_eq!(clamp_along_edge(10.0, 10.0, 10.0), 5.0);
    }

    #[test]
    fn bake_extent_clamps_target_and_fade_together() {
        // Target texture and fade uniforms derive from one extent, so a
        // zero-sized request cannot feed w = 0 or h = 0 into the shader.
        assert_eq!(bake_extent(0, 0), (1, 1));
        assert_eq!(bake_extent(64, 0), (64, 1));
        assert_eq!(bake_extent(0, 32), (1, 32));
        assert_eq!(bake_extent(64, 32), (64, 32));
    }

    #[test]
    fn alpha_is_always_in_unit_range() {
        for dir in [
            FadeDirection::Left,
            FadeDirection::Right,
            FadeDirection::Above,
            FadeDirection::Below,
        ] {
            for corners in [false, true] {
                for gy in 0..=8 {
                    for gx in 0..=8 {
                        let a = fade_alpha(
                            dir,
                            corners,
                            96.0,
                            32.0,
                            96.0 * gx as f32 / 8.0,
                            32.0 * gy as f32 / 8.0,
                        );
                        assert!((0.0..=1.0).contains(&a));
                    }
                }
            }
        }
    }
}
