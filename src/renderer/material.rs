use std::sync::Arc;

use glam::Vec2;
use serde::Deserialize;

use super::light::{ActiveLights, GpuLight, LightSource, flicker_factor};
use super::shader::{
    I32Uniform, UniformBlock, UniformLayout, UniformType, Vec4Uniform,
};
use super::texture::Texture;
use crate::error::RenderError;

// ── Blend contract ───────────────────────────────────────────────────────────

/// How a material's flat color combines with its sampled texture color.
/// Only meaningful when both are present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Texture fully overrides the color.
    #[default]
    None = 0,
    /// `texture * color`.
    Multiplicative = 1,
    /// `(texture + color) / 2`.
    Averaged = 2,
}

/// The material uniform struct — field names and order are the binding
/// contract with `shaders/world.wgsl`; renaming any of them is a breaking
/// interface change.
pub fn material_uniform_layout() -> UniformLayout {
    UniformLayout::new(&[
        ("color", UniformType::Vec4),
        ("is_textured", UniformType::I32),
        ("blend", UniformType::I32),
        ("use_lights", UniformType::I32),
    ])
}

// ── Material ─────────────────────────────────────────────────────────────────

/// Shared GPU objects a material needs at construction time, owned by the
/// renderer: the per-material bind group layout, the pixel-art sampler, and
/// the 1×1 white placeholder bound when a material has no texture.
pub struct MaterialContext<'a> {
    pub device: &'a wgpu::Device,
    pub layout: &'a wgpu::BindGroupLayout,
    pub uniform_layout: &'a UniformLayout,
    pub sampler: &'a wgpu::Sampler,
    pub fallback_view: &'a wgpu::TextureView,
}

/// A texture and/or flat color plus the blend rule, bound as shader uniform
/// state before its owning model draws.
pub struct Material {
    texture: Option<Arc<Texture>>,
    /// Whether `cleanup` may destroy the texture. Borrowed shared textures
    /// (a common font sheet, a baked tile atlas) stay alive for their owner.
    owns_texture: bool,
    color: [f32; 4],
    blend: BlendMode,
    uniforms: UniformBlock,
    u_color: Vec4Uniform,
    u_is_textured: I32Uniform,
    u_blend: I32Uniform,
    u_use_lights: I32Uniform,
    bind_group: wgpu::BindGroup,
}

impl Material {
    /// Build a material from its parts. With neither texture nor color the
    /// material falls back to opaque white.
    pub fn new(
        ctx: &MaterialContext<'_>,
        texture: Option<Arc<Texture>>,
        owns_texture: bool,
        color: Option<[f32; 4]>,
        blend: BlendMode,
    ) -> Result<Self, RenderError> {
        let is_textured = texture.is_some();
        let color = match color {
            Some(c) => c,
            None if is_textured => [0.0; 4], // Ignored while blend is None.
            None => [1.0, 1.0, 1.0, 1.0],
        };

        let u_color = ctx.uniform_layout.register_vec4("color")?;
        let u_is_textured = ctx.uniform_layout.register_i32("is_textured")?;
        let u_blend = ctx.uniform_layout.register_i32("blend")?;
        let u_use_lights = ctx.uniform_layout.register_i32("use_lights")?;

        let mut uniforms = UniformBlock::new(ctx.device, ctx.uniform_layout, "material_uniforms");
        uniforms.set_vec4(u_color, color);
        uniforms.set_i32(u_is_textured, is_textured as i32);
        uniforms.set_i32(u_blend, blend as i32);
        uniforms.set_i32(u_use_lights, 1);

        let view = texture.as_ref().map(|t| &t.view).unwrap_or(ctx.fallback_view);
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("material_bg"),
            layout: ctx.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(ctx.sampler),
                },
            ],
        });

        Ok(Self {
            texture,
            owns_texture,
            color,
            blend,
            uniforms,
            u_color,
            u_is_textured,
            u_blend,
            u_use_lights,
            bind_group,
        })
    }

    /// Flat-color material (untextured).
    pub fn from_color(ctx: &MaterialContext<'_>, color: [f32; 4]) -> Result<Self, RenderError> {
        Self::new(ctx, None, false, Some(color), BlendMode::None)
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub fn blend(&self) -> BlendMode {
        self.blend
    }

    pub fn is_textured(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture(&self) -> Option<&Arc<Texture>> {
        self.texture.as_ref()
    }

    pub fn set_color(&mut self, color: [f32; 4]) {
        self.color = color;
        self.uniforms.set_vec4(self.u_color, color);
    }

    /// Foreground/UI draws disable the lighting composite entirely.
    pub fn set_use_lights(&mut self, use_lights: bool) {
        self.uniforms.set_i32(self.u_use_lights, use_lights as i32);
    }

    /// Upload this material's uniform state and set its bind group.
    /// Called before the owning model's draw.
    pub fn bind(&self, queue: &wgpu::Queue, pass: &mut wgpu::RenderPass<'_>) {
        self.uniforms.upload(queue);
        pass.set_bind_group(1, &self.bind_group, &[]);
    }

    /// Release the owned texture, if any. A material never cleans up a
    /// texture it merely borrows.
    pub fn cleanup(&self) {
        if self.owns_texture
            && let Some(texture) = &self.texture
        {
            texture.cleanup();
        }
    }
}

// ── LightSourceMaterial ──────────────────────────────────────────────────────

/// A material that also carries a point light. Binding it registers the
/// light into the scene's active light list for this frame.
pub struct LightSourceMaterial {
    pub material: Material,
    pub light: LightSource,
    /// Offset from the owner's position to the light's center (e.g. the
    /// lamp head of a lamppost sprite).
    pub position_offset: Vec2,
    current_position: Vec2,
}

impl LightSourceMaterial {
    pub fn new(material: Material, light: LightSource, position_offset: Vec2) -> Self {
        Self {
            material,
            light,
            position_offset,
            current_position: Vec2::ZERO,
        }
    }

    /// Refresh the light's world position. The owner calls this every frame
    /// before binding, or the light renders at a stale position.
    pub fn set_position(&mut self, owner_position: Vec2) {
        self.current_position = owner_position + self.position_offset;
    }

    pub fn position(&self) -> Vec2 {
        self.current_position
    }

    /// Bind the material uniforms and push the (flicker-modulated) light
    /// into the next free active-light slot.
    pub fn bind(
        &self,
        queue: &wgpu::Queue,
        pass: &mut wgpu::RenderPass<'_>,
        lights: &mut ActiveLights,
        time: f32,
    ) {
        lights.push(GpuLight {
            glow: self.light.glow,
            position: self.current_position.to_array(),
            reach: self.light.reach,
            intensity: self.light.intensity * flicker_factor(time, self.light.flicker_speed),
        });
        self.material.bind(queue, pass);
    }

    pub fn cleanup(&self) {
        self.material.cleanup();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // GPU-free mirror of the blend contract in shaders/world.wgsl.

    /// Reference implementation of the fragment blend stage.
    fn blend_sample(
        texel: [f32; 4],
        color: [f32; 4],
        is_textured: bool,
        blend: BlendMode,
    ) -> [f32; 4] {
        if !is_textured {
            return color;
        }
        match blend {
            BlendMode::None => texel,
            BlendMode::Multiplicative => [
                texel[0] * color[0],
                texel[1] * color[1],
                texel[2] * color[2],
                texel[3] * color[3],
            ],
            BlendMode::Averaged => [
                (texel[0] + color[0]) / 2.0,
                (texel[1] + color[1]) / 2.0,
                (texel[2] + color[2]) / 2.0,
                (texel[3] + color[3]) / 2.0,
            ],
        }
    }

    #[test]
    fn untextured_material_outputs_flat_color() {
        let red = [1.0, 0.0, 0.0, 1.0];
        // Blend mode is irrelevant without a texture.
        for blend in [BlendMode::None, BlendMode::Multiplicative, BlendMode::Averaged] {
            assert_eq!(blend_sample([0.3, 0.7, 0.2, 0.5], red, false, blend), red);
        }
    }

    #[test]
    fn multiplicative_black_times_white_is_black() {
        let out = blend_sample(
            [1.0, 1.0, 1.0, 1.0],
            [0.0, 0.0, 0.0, 1.0],
            true,
            BlendMode::Multiplicative,
        );
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn blend_none_ignores_color_when_textured() {
        let texel = [0.2, 0.4, 0.6, 1.0];
        let out = blend_sample(texel, [1.0, 0.0, 0.0, 1.0], true, BlendMode::None);
        assert_eq!(out, texel);
    }

    #[test]
    fn averaged_is_midpoint() {
        let out = blend_sample(
            [1.0, 0.0, 1.0, 1.0],
            [0.0, 1.0, 1.0, 1.0],
            true,
            BlendMode::Averaged,
        );
        assert_eq!(out, [0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn blend_mode_discriminants_match_shader_contract() {
        assert_eq!(BlendMode::None as i32, 0);
        assert_eq!(BlendMode::Multiplicative as i32, 1);
        assert_eq!(BlendMode::Averaged as i32, 2);
    }
}
