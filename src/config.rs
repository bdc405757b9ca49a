//! Descriptor types handed over by the upstream scene loader.
//!
//! Parsing happens upstream; this module owns the shapes and the
//! degraded-default validation. A descriptor with out-of-range values is
//! clamped with a warning instead of rejected, so a bad scene file renders
//! wrong rather than not at all.

use serde::Deserialize;

use crate::renderer::light::LightSource;
use crate::renderer::material::BlendMode;

/// Material description as it appears in scene data.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MaterialDesc {
    pub texture_path: Option<String>,
    pub color: Option<[f32; 4]>,
    pub blend: Option<BlendMode>,
}

impl MaterialDesc {
    /// Blend mode with the default applied.
    pub fn blend(&self) -> BlendMode {
        self.blend.unwrap_or_default()
    }
}

/// Point light description as it appears in scene data.
///
/// Bounds: `glow` channels and `intensity` in `[0, 10]`, `reach` and
/// `flicker_speed` non-negative.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct LightDesc {
    pub glow: [f32; 4],
    pub reach: f32,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default)]
    pub flicker_speed: f32,
}

fn default_intensity() -> f32 {
    1.0
}

impl LightDesc {
    /// Clamp every field into its documented range, warning on each
    /// correction, and produce the light source.
    pub fn validated(self) -> LightSource {
        let mut glow = self.glow;
        for (i, channel) in glow.iter_mut().enumerate() {
            if !(0.0..=10.0).contains(channel) {
                let clamped = channel.clamp(0.0, 10.0);
                log::warn!("light glow[{i}] {} out of [0, 10]; clamping to {clamped}", *channel);
                *channel = clamped;
            }
        }

        let reach = if self.reach < 0.0 {
            log::warn!("light reach {} is negative; treating as 0 (disabled)", self.reach);
            0.0
        } else {
            self.reach
        };

        let intensity = if !(0.0..=10.0).contains(&self.intensity) {
            let clamped = self.intensity.clamp(0.0, 10.0);
            log::warn!(
                "light intensity {} out of [0, 10]; clamping to {clamped}",
                self.intensity
            );
            clamped
        } else {
            self.intensity
        };

        let flicker_speed = if self.flicker_speed < 0.0 {
            log::warn!(
                "light flicker_speed {} is negative; disabling flicker",
                self.flicker_speed
            );
            0.0
        } else {
            self.flicker_speed
        };

        LightSource {
            glow,
            reach,
            intensity,
            flicker_speed,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_desc_parses_from_json() {
        let desc: MaterialDesc = serde_json::from_str(
            r#"{ "texture_path": "sprites/lamp.png", "blend": "multiplicative" }"#,
        )
        .unwrap();
        assert_eq!(desc.texture_path.as_deref(), Some("sprites/lamp.png"));
        assert_eq!(desc.color, None);
        assert_eq!(desc.blend(), BlendMode::Multiplicative);
    }

    #[test]
    fn blend_defaults_to_none() {
        let desc: MaterialDesc = serde_json::from_str(r#"{ "color": [1, 0, 0, 1] }"#).unwrap();
        assert_eq!(desc.blend(), BlendMode::None);
    }

    #[test]
    fn light_desc_parses_with_defaults() {
        let desc: LightDesc =
            serde_json::from_str(r#"{ "glow": [1.5, 1.2, 0.8, 1.0], "reach": 6.0 }"#).unwrap();
        assert_eq!(desc.intensity, 1.0);
        assert_eq!(desc.flicker_speed, 0.0);
    }

    #[test]
    fn in_range_light_passes_through_unchanged() {
        let desc = LightDesc {
            glow: [2.0, 1.0, 1.0, 1.0],
            reach: 5.0,
            intensity: 1.0,
            flicker_speed: 7.0,
        };
        let light = desc.validated();
        assert_eq!(light.glow, [2.0, 1.0, 1.0, 1.0]);
        assert_eq!(light.reach, 5.0);
        assert_eq!(light.intensity, 1.0);
        assert_eq!(light.flicker_speed, 7.0);
    }

    #[test]
    fn out_of_range_light_is_clamped_not_rejected() {
        let desc = LightDesc {
            glow: [-1.0, 50.0, 1.0, 1.0],
            reach: -3.0,
            intensity: 99.0,
            flicker_speed: -2.0,
        };
        let light = desc.validated();
        assert_eq!(light.glow, [0.0, 10.0, 1.0, 1.0]);
        assert_eq!(light.reach, 0.0, "negative reach disables the light");
        assert_eq!(light.intensity, 10.0);
        assert_eq!(light.flicker_speed, 0.0);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let desc: LightDesc = serde_json::from_str(
            r#"{ "glow": [1, 1, 1, 1], "reach": 2.0, "shadow_softness": 0.4 }"#,
        )
        .unwrap();
        assert_eq!(desc.reach, 2.0);
    }
}
