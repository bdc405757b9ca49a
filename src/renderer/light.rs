use serde::Deserialize;

/// Hard capacity of the per-frame light list. Matches the uniform array in
/// `shaders/world.wgsl`; lights bound past this are dropped, never an error.
pub const MAX_LIGHTS: usize = 32;

/// Cool night tint applied at `sun_presence = 0`.
pub const MOONLIGHT: [f32; 3] = [0.6, 0.6, 1.1];
/// Warm day tint applied at `sun_presence = 1`.
pub const SUNLIGHT: [f32; 3] = [1.1, 0.9, 0.75];

// ── LightSource ──────────────────────────────────────────────────────────────

/// Pure light description — glow color, reach, intensity, flicker speed.
/// Immutable once loaded from its descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct LightSource {
    pub glow: [f32; 4],
    /// Maximum distance (world units) at which this light affects a fragment.
    pub reach: f32,
    pub intensity: f32,
    /// Radians per second for the intensity flicker; `0.0` disables it.
    pub flicker_speed: f32,
}

/// Sinusoidal intensity modulation in `[0.7, 1.0]`. Identity at speed zero.
pub fn flicker_factor(time: f32, speed: f32) -> f32 {
    if speed <= 0.0 {
        return 1.0;
    }
    0.85 + 0.15 * (time * speed).sin()
}

// ── Active light list ────────────────────────────────────────────────────────

/// One slot of the GPU light array. `reach == 0` marks an empty slot.
///
/// Layout matches the WGSL `Light` struct (32 bytes, 16-byte aligned).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    pub glow: [f32; 4],
    pub position: [f32; 2],
    pub reach: f32,
    pub intensity: f32,
}

/// The scene-wide light list, rebuilt from bound light-source materials every
/// frame and never persisted across frames.
pub struct ActiveLights {
    slots: [GpuLight; MAX_LIGHTS],
    count: usize,
}

impl Default for ActiveLights {
    fn default() -> Self {
        Self {
            slots: [GpuLight::default(); MAX_LIGHTS],
            count: 0,
        }
    }
}

impl ActiveLights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty every slot for the next frame.
    pub fn begin_frame(&mut self) {
        self.slots = [GpuLight::default(); MAX_LIGHTS];
        self.count = 0;
    }

    /// Fill the next free slot. Past [`MAX_LIGHTS`] the light is dropped —
    /// a documented capacity limit, not an error.
    pub fn push(&mut self, light: GpuLight) {
        if self.count >= MAX_LIGHTS {
            log::debug!("active light list full ({MAX_LIGHTS}); dropping light");
            return;
        }
        self.slots[self.count] = light;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn slots(&self) -> &[GpuLight; MAX_LIGHTS] {
        &self.slots
    }
}

// ── Day/night cycle ──────────────────────────────────────────────────────────

/// Continuous world clock driving the day/night tint.
pub struct DayNightCycle {
    /// Seconds since midnight, wrapped into `[0, day_length)`.
    time_of_day: f32,
    day_length: f32,
}

impl DayNightCycle {
    pub fn new(day_length: f32, start_time: f32) -> Self {
        Self {
            time_of_day: start_time.rem_euclid(day_length),
            day_length,
        }
    }

    pub fn advance(&mut self, dt: f32) {
        self.time_of_day = (self.time_of_day + dt).rem_euclid(self.day_length);
    }

    pub fn time_of_day(&self) -> f32 {
        self.time_of_day
    }

    /// Sun presence in `[0, 1]`: 0 at midnight, 1 at midday, following a
    /// cosine curve so dawn and dusk ease in and out.
    pub fn sun_presence(&self) -> f32 {
        use std::f32::consts::TAU;
        0.5 - 0.5 * (TAU * self.time_of_day / self.day_length).cos()
    }
}

// ── Fragment composite (CPU mirror of shaders/world.wgsl) ────────────────────
//
// These are the reference implementations of the per-fragment lighting math,
// kept in exact agreement with the fragment shader. Pure functions so the
// numeric contract can be tested without a GPU.

fn lerp3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Day/night stage: quarter the base color for additive headroom, brighten
/// with the sun, tint between moonlight and sunlight.
///
/// `s` outside `[0, 1]` is not clamped here — callers own that contract.
pub fn day_night_tint(c: [f32; 3], s: f32) -> [f32; 3] {
    let tint = lerp3(MOONLIGHT, SUNLIGHT, s);
    let brighten = (1.0 + 3.0 * s) / 4.0;
    [
        c[0] * brighten * tint[0],
        c[1] * brighten * tint[1],
        c[2] * brighten * tint[2],
    ]
}

/// Blend one light into the running day/night color at distance `d`.
///
/// Out of reach (`d > reach`, or an empty slot) leaves the color untouched.
/// Inside, the day/night brightening is undone, the base is scaled by the
/// light's night-weighted intensity and glow, and the lit color blends
/// linearly: fully lit at the center, exactly the unlit color at the edge.
pub fn apply_light(day_night: [f32; 3], s: f32, light: &GpuLight, d: f32) -> [f32; 3] {
    if light.reach <= 0.0 || d > light.reach {
        return day_night;
    }
    let undo = 4.0 / (1.0 + 3.0 * s);
    let strength = s + light.intensity * (1.0 - s);
    let t = d / light.reach;
    let mut out = [0.0f32; 3];
    for i in 0..3 {
        let base_before_sun = day_night[i] * undo;
        let lit = base_before_sun * strength * light.glow[i];
        out[i] = t * day_night[i] + (1.0 - t) * lit;
    }
    out
}

/// Full per-fragment composite: day/night tint, then every active light in
/// array order. Each light blends against the *already lit* running color,
/// so overlapping lights compound. Alpha is untouched by lighting.
pub fn composite_fragment(
    c: [f32; 4],
    s: f32,
    use_lights: bool,
    lights: &[GpuLight],
    frag_pos: [f32; 2],
) -> [f32; 4] {
    let mut rgb = day_night_tint([c[0], c[1], c[2]], s);
    if use_lights {
        for light in lights {
            let dx = frag_pos[0] - light.position[0];
            let dy = frag_pos[1] - light.position[1];
            let d = (dx * dx + dy * dy).sqrt();
            rgb = apply_light(rgb, s, light, d);
        }
    }
    [rgb[0], rgb[1], rgb[2], c[3]]
}

// ── Tests ────────────────────────────────────────────────────────────────────
