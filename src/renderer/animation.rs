use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::texture::Texture;
use crate::error::RenderError;

/// Called when an animation crosses a frame boundary, with the new frame index.
pub type FrameChanged = Box<dyn FnMut(u32)>;

// ── Frame UV computation (pure, GPU-free) ────────────────────────────────────

/// Tex coords for one frame of a horizontal sprite strip.
///
/// Frames are laid out left to right; `flip` mirrors horizontally.
/// Order matches `Model::quad`: top-left, top-right, bottom-left, bottom-right.
pub fn frame_tex_coords(frame_count: u32, frame: u32, flip: bool) -> [[f32; 2]; 4] {
    debug_assert!(frame < frame_count);
    let mut u0 = frame as f32 / frame_count as f32;
    let mut u1 = (frame + 1) as f32 / frame_count as f32;
    if flip {
        std::mem::swap(&mut u0, &mut u1);
    }
    [[u0, 0.0], [u1, 0.0], [u0, 1.0], [u1, 1.0]]
}

// ── FrameClock ───────────────────────────────────────────────────────────────

/// Frame-timing state for a looping sprite-sheet animation.
///
/// Split out of [`AnimatedTexture`] so the timing semantics can be tested
/// without a GPU or window.
pub struct FrameClock {
    frame_count: u32,
    current_frame: u32,
    frame_duration: f32,
    time_remaining: f32,
    on_frame_changed: Option<FrameChanged>,
}

impl FrameClock {
    pub fn new(frame_count: u32, frame_duration: f32) -> Result<Self, RenderError> {
        if frame_count == 0 {
            return Err(RenderError::EmptyAnimation);
        }
        Ok(Self {
            frame_count,
            current_frame: 0,
            frame_duration,
            time_remaining: frame_duration,
            on_frame_changed: None,
        })
    }

    pub fn with_callback(mut self, callback: FrameChanged) -> Self {
        self.on_frame_changed = Some(callback);
        self
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn time_remaining(&self) -> f32 {
        self.time_remaining
    }

    /// Advance by `dt` seconds, stepping frames modulo `frame_count`.
    ///
    /// A large `dt` can cross several frame boundaries; each one is consumed
    /// in turn so that splitting an interval across calls lands on the same
    /// frame and remaining time as one combined call.
    pub fn advance(&mut self, dt: f32) {
        // A zero frame duration would loop forever below; treat as static.
        if self.frame_duration <= 0.0 {
            return;
        }
        self.time_remaining -= dt;
        while self.time_remaining <= 0.0 {
            self.time_remaining += self.frame_duration;
            self.current_frame = (self.current_frame + 1) % self.frame_count;
            if let Some(cb) = self.on_frame_changed.as_mut() {
                cb(self.current_frame);
            }
        }
    }
}

// ── AnimatedTexture ──────────────────────────────────────────────────────────

/// A texture plus frame timing over a horizontal sprite strip.
///
/// Advanced exactly once per tick through the [`AnimationRegistry`] — two
/// drawables sharing one instance must not each call `advance`, or the
/// animation runs at a multiplied rate.
pub struct AnimatedTexture {
    pub texture: Arc<Texture>,
    pub clock: FrameClock,
}

impl AnimatedTexture {
    pub fn new(
        texture: Arc<Texture>,
        frame_count: u32,
        frame_duration: f32,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            texture,
            clock: FrameClock::new(frame_count, frame_duration)?,
        })
    }

    pub fn current_frame(&self) -> u32 {
        self.clock.current_frame()
    }

    pub fn frame_count(&self) -> u32 {
        self.clock.frame_count()
    }
}

// ── Multi-state animation ────────────────────────────────────────────────────

/// One named sub-sequence of a sprite sheet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationState {
    pub frame_count: u32,
    pub frame_duration: f32,
}

/// Frame timing over a sheet partitioned into states (idle, walk, ...).
///
/// The overall sheet frame is `frame_within_state` plus the frame counts of
/// every state before the current one.
pub struct MultiStateClock {
    states: Vec<AnimationState>,
    frame_count: u32,
    current_state: usize,
    frame_within_state: u32,
    time_remaining: f32,
    on_frame_changed: Option<FrameChanged>,
}

impl MultiStateClock {
    /// Fails unless the states exactly cover the sheet's `frame_count`.
    pub fn new(frame_count: u32, states: Vec<AnimationState>) -> Result<Self, RenderError> {
        if frame_count == 0 || states.is_empty() {
            return Err(RenderError::EmptyAnimation);
        }
        let state_total: u32 = states.iter().map(|s| s.frame_count).sum();
        if state_total != frame_count {
            return Err(RenderError::StateFrameMismatch {
                state_total,
                frame_count,
            });
        }
        if states.iter().any(|s| s.frame_count == 0) {
            return Err(RenderError::EmptyAnimation);
        }
        let time_remaining = states[0].frame_duration;
        Ok(Self {
            states,
            frame_count,
            current_state: 0,
            frame_within_state: 0,
            time_remaining,
            on_frame_changed: None,
        })
    }

    pub fn with_callback(mut self, callback: FrameChanged) -> Self {
        self.on_frame_changed = Some(callback);
        self
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn current_state(&self) -> usize {
        self.current_state
    }

    pub fn frame_within_state(&self) -> u32 {
        self.frame_within_state
    }

    pub fn time_remaining(&self) -> f32 {
        self.time_remaining
    }

    /// Sheet-wide frame index: frames of earlier states, then the offset
    /// within the current one.
    pub fn current_frame(&self) -> u32 {
        let prefix: u32 = self.states[..self.current_state]
            .iter()
            .map(|s| s.frame_count)
            .sum();
        prefix + self.frame_within_state
    }

    /// Switch to `state`, discarding any partially elapsed time in the old
    /// one. The frame offset is bounded into the new state's range.
    pub fn set_state(&mut self, state: usize) {
        debug_assert!(state < self.states.len(), "state index out of range");
        let state = state.min(self.states.len() - 1);
        self.current_state = state;
        self.time_remaining = self.states[state].frame_duration;
        self.frame_within_state = self.frame_within_state.min(self.states[state].frame_count - 1);
        let frame = self.current_frame();
        if let Some(cb) = self.on_frame_changed.as_mut() {
            cb(frame);
        }
    }

    /// Advance within the current state, wrapping modulo its frame count.
    pub fn advance(&mut self, dt: f32) {
        let state = self.states[self.current_state];
        if state.frame_duration <= 0.0 {
            return;
        }
        self.time_remaining -= dt;
        while self.time_remaining <= 0.0 {
            self.time_remaining += state.frame_duration;
            self.frame_within_state = (self.frame_within_state + 1) % state.frame_count;
            let frame = self.current_frame();
            if let Some(cb) = self.on_frame_changed.as_mut() {
                cb(frame);
            }
        }
    }
}

/// [`AnimatedTexture`] with named sub-sequences of frames.
pub struct MultiStateAnimatedTexture {
    pub texture: Arc<Texture>,
    pub clock: MultiStateClock,
}

impl MultiStateAnimatedTexture {
    pub fn new(
        texture: Arc<Texture>,
        frame_count: u32,
        states: Vec<AnimationState>,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            texture,
            clock: MultiStateClock::new(frame_count, states)?,
        })
    }

    pub fn set_state(&mut self, state: usize) {
        self.clock.set_state(state);
    }

    pub fn current_frame(&self) -> u32 {
        self.clock.current_frame()
    }
}

// ── Shared tex-coord buffer cache ────────────────────────────────────────────

/// Lazily built tex-coord buffers shared by every animation with the same
/// `(frame_count, flip)`.
///
/// Uploading one quad of UVs per frame per *distinct frame count* — rather
/// than per instance — keeps the buffer count flat no matter how many
/// sprites animate. An explicit registry owned by the renderer, not a
/// static map; `get_or_create` is create-if-absent, so a repeated first
/// access for the same key is idempotent.
pub struct TexCoordCache<B = wgpu::Buffer> {
    entries: HashMap<(u32, bool), Vec<B>>,
}

impl<B> Default for TexCoordCache<B> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<B> TexCoordCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct `(frame_count, flip)` keys currently cached.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Create-if-absent over an arbitrary per-frame builder. The GPU entry
    /// points below fix `B = wgpu::Buffer`; the sharing semantics live here
    /// so they are testable without a device.
    fn get_or_create_with(
        &mut self,
        frame_count: u32,
        flip: bool,
        build: impl FnMut(u32) -> B,
    ) -> &[B] {
        self.entries
            .entry((frame_count, flip))
            .or_insert_with(|| (0..frame_count).map(build).collect())
            .as_slice()
    }

    fn frame_buffer_with(
        &mut self,
        frame_count: u32,
        frame: u32,
        flip: bool,
        build: impl FnMut(u32) -> B,
    ) -> Result<&B, RenderError> {
        if frame >= frame_count {
            return Err(RenderError::InvalidFrame { frame, frame_count });
        }
        Ok(&self.get_or_create_with(frame_count, flip, build)[frame as usize])
    }
}

impl TexCoordCache {
    fn build_buffer(
        device: &wgpu::Device,
        frame_count: u32,
        flip: bool,
    ) -> impl FnMut(u32) -> wgpu::Buffer + '_ {
        move |frame| {
            let coords = frame_tex_coords(frame_count, frame, flip);
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("texcoords_{frame_count}f_{frame}")),
                contents: bytemuck::cast_slice(&coords),
                usage: wgpu::BufferUsages::VERTEX,
            })
        }
    }

    /// All per-frame tex-coord buffers for `(frame_count, flip)`, building
    /// them on first access.
    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        frame_count: u32,
        flip: bool,
    ) -> &[wgpu::Buffer] {
        self.get_or_create_with(frame_count, flip, Self::build_buffer(device, frame_count, flip))
    }

    /// Buffer for one frame of `(frame_count, flip)`; fails with
    /// `InvalidFrame` when `frame` is outside the strip, matching
    /// [`Model::set_frame`](super::model::Model::set_frame).
    pub fn frame_buffer(
        &mut self,
        device: &wgpu::Device,
        frame_count: u32,
        frame: u32,
        flip: bool,
    ) -> Result<&wgpu::Buffer, RenderError> {
        self.frame_buffer_with(frame_count, frame, flip, Self::build_buffer(device, frame_count, flip))
    }
}

// ── AnimationRegistry ────────────────────────────────────────────────────────

/// Anything whose frame timing moves forward with the world clock.
pub trait Animate {
    fn advance(&mut self, dt: f32);
}

impl Animate for AnimatedTexture {
    fn advance(&mut self, dt: f32) {
        self.clock.advance(dt);
    }
}

impl Animate for MultiStateAnimatedTexture {
    fn advance(&mut self, dt: f32) {
        self.clock.advance(dt);
    }
}

/// The single authoritative update pass for animated textures.
///
/// Drawables hold `Rc` clones of registered animations and never call
/// `advance` themselves; the renderer calls [`AnimationRegistry::advance_all`]
/// once per tick, so an animation shared by many drawables still steps at
/// its real rate.
#[derive(Default)]
pub struct AnimationRegistry {
    animations: Vec<Rc<RefCell<dyn Animate>>>,
}

impl AnimationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an animation, returning the shared handle to draw with.
    /// Registering the same handle twice is a no-op.
    pub fn register(&mut self, animation: Rc<RefCell<dyn Animate>>) -> Rc<RefCell<dyn Animate>> {
        if !self
            .animations
            .iter()
            .any(|a| Rc::ptr_eq(a, &animation))
        {
            self.animations.push(Rc::clone(&animation));
        }
        animation
    }

    /// Drop animations nothing else references any more.
    pub fn prune(&mut self) {
        self.animations.retain(|a| Rc::strong_count(a) > 1);
    }

    pub fn len(&self) -> usize {
        self.animations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.animations.is_empty()
    }

    /// Advance every unique registered animation exactly once.
    pub fn advance_all(&mut self, dt: f32) {
        for anim in &self.animations {
            anim.borrow_mut().advance(dt);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── frame_tex_coords ──────────────────────────────────────────────────

    #[test]
    fn frame_zero_starts_at_u_zero() {
        let c = frame_tex_coords(4, 0, false);
        assert_eq!(c[0], [0.0, 0.0]);
        assert_eq!(c[1], [0.25, 0.0]);
    }

    #[test]
    fn last_frame_ends_at_u_one() {
        let c = frame_tex_coords(4, 3, false);
        assert_eq!(c[1], [1.0, 0.0]);
        assert_eq!(c[3], [1.0, 1.0]);
    }

    #[test]
    fn flip_mirrors_u_axis() {
        let plain = frame_tex_coords(4, 1, false);
        let flipped = frame_tex_coords(4, 1, true);
        assert_eq!(plain[0][0], flipped[1][0]);
        assert_eq!(plain[1][0], flipped[0][0]);
        // V axis untouched.
        assert_eq!(plain[0][1], flipped[0][1]);
    }

    #[test]
    fn same_key_produces_identical_coords() {
        // Two animations with the same (frame_count, flip) share cache
        // entries; the values they resolve must be identical per frame.
        for frame in 0..6 {
            assert_eq!(
                frame_tex_coords(6, frame, true),
                frame_tex_coords(6, frame, true)
            );
        }
    }

    // ── FrameClock ────────────────────────────────────────────────────────

    #[test]
    fn clock_rejects_zero_frames() {
        assert!(FrameClock::new(0, 0.1).is_err());
    }

    #[test]
    fn advance_steps_on_boundary() {
        let mut c = FrameClock::new(4, 0.1).unwrap();
        c.advance(0.05);
        assert_eq!(c.current_frame(), 0);
        c.advance(0.06);
        assert_eq!(c.current_frame(), 1);
    }

    #[test]
    fn advance_wraps_modulo_frame_count() {
        let mut c = FrameClock::new(3, 0.1).unwrap();
        c.advance(0.31);
        assert_eq!(c.current_frame(), 0, "three boundaries wrap back to 0");
    }

    #[test]
    fn split_intervals_match_one_call() {
        let mut a = FrameClock::new(5, 0.07).unwrap();
        let mut b = FrameClock::new(5, 0.07).unwrap();
        a.advance(0.04);
        a.advance(0.09);
        b.advance(0.13);
        assert_eq!(a.current_frame(), b.current_frame());
        assert!((a.time_remaining() - b.time_remaining()).abs() < 1e-6);
    }

    #[test]
    fn callback_fires_once_per_boundary() {
        let count = Rc::new(RefCell::new(0u32));
        let counter = Rc::clone(&count);
        let mut c = FrameClock::new(4, 0.1)
            .unwrap()
            .with_callback(Box::new(move |_| *counter.borrow_mut() += 1));
        c.advance(0.25);
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn zero_duration_clock_is_static() {
        let mut c = FrameClock::new(4, 0.0).unwrap();
        c.advance(10.0);
        assert_eq!(c.current_frame(), 0);
    }

    // ── MultiStateClock ───────────────────────────────────────────────────

    fn walk_idle() -> MultiStateClock {
        // 6-frame sheet: 2 idle frames then 4 walk frames.
        MultiStateClock::new(
            6,
            vec![
                AnimationState { frame_count: 2, frame_duration: 0.5 },
                AnimationState { frame_count: 4, frame_duration: 0.1 },
            ],
        )
        .unwrap()
    }

    #[test]
    fn state_sum_mismatch_rejected() {
        let err = MultiStateClock::new(
            5,
            vec![
                AnimationState { frame_count: 2, frame_duration: 0.1 },
                AnimationState { frame_count: 4, frame_duration: 0.1 },
            ],
        );
        assert!(matches!(
            err,
            Err(RenderError::StateFrameMismatch { state_total: 6, frame_count: 5 })
        ));
    }

    #[test]
    fn overall_frame_is_prefix_sum_plus_offset() {
        let mut c = walk_idle();
        c.set_state(1);
        c.advance(0.25);
        assert_eq!(c.frame_within_state(), 2);
        assert_eq!(c.current_frame(), 2 + 2, "2 idle frames precede walk");
    }

    #[test]
    fn set_state_discards_partial_time() {
        let mut c = walk_idle();
        c.advance(0.3); // Partway into the first idle frame.
        c.set_state(1);
        assert!((c.time_remaining() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn set_state_bounds_frame_offset() {
        let mut c = walk_idle();
        c.set_state(1);
        c.advance(0.35); // frame_within_state = 3.
        assert_eq!(c.frame_within_state(), 3);
        c.set_state(0); // Only 2 frames; offset must clamp to 1.
        assert_eq!(c.frame_within_state(), 1);
        assert_eq!(c.current_frame(), 1);
    }

    #[test]
    fn advance_wraps_within_state_only() {
        let mut c = walk_idle();
        c.set_state(1);
        c.advance(0.45); // 4 boundaries: 0→1→2→3→0 within the walk state.
        assert_eq!(c.frame_within_state(), 0);
        assert_eq!(c.current_frame(), 2, "wraps to the walk state's first frame");
    }

    // ── TexCoordCache ─────────────────────────────────────────────────────
    //
    // The cache is exercised through the generic builder seam with plain
    // integers standing in for GPU buffers.

    #[test]
    fn same_key_resolves_to_the_same_entry() {
        let mut cache: TexCoordCache<u32> = TexCoordCache::new();
        let mut builds = 0;
        let first = cache
            .get_or_create_with(6, true, |frame| {
                builds += 1;
                frame
            })
            .as_ptr();
        let second = cache
            .get_or_create_with(6, true, |frame| {
                builds += 1;
                frame
            })
            .as_ptr();
        assert_eq!(first, second, "one key, one shared buffer set");
        assert_eq!(builds, 6, "the second lookup must not rebuild");
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn flip_is_part_of_the_cache_key() {
        let mut cache: TexCoordCache<u32> = TexCoordCache::new();
        cache.get_or_create_with(4, false, |f| f);
        cache.get_or_create_with(4, true, |f| f);
        assert_eq!(cache.entry_count(), 2);
    }

    #[test]
    fn out_of_range_frame_is_rejected_not_indexed() {
        let mut cache: TexCoordCache<u32> = TexCoordCache::new();
        assert!(matches!(
            cache.frame_buffer_with(4, 4, false, |f| f),
            Err(RenderError::InvalidFrame { frame: 4, frame_count: 4 })
        ));
        assert_eq!(cache.frame_buffer_with(4, 3, false, |f| f).unwrap(), &3);
    }

    // ── AnimationRegistry ─────────────────────────────────────────────────

    struct CountingAnim {
        ticks: u32,
    }

    impl Animate for CountingAnim {
        fn advance(&mut self, _dt: f32) {
            self.ticks += 1;
        }
    }

    #[test]
    fn registry_advances_each_animation_once() {
        let mut reg = AnimationRegistry::new();
        let anim = Rc::new(RefCell::new(CountingAnim { ticks: 0 }));
        // Two drawables registering the same shared handle must not
        // double-step the animation.
        reg.register(anim.clone() as Rc<RefCell<dyn Animate>>);
        reg.register(anim.clone() as Rc<RefCell<dyn Animate>>);
        assert_eq!(reg.len(), 1);
        reg.advance_all(0.016);
        assert_eq!(anim.borrow().ticks, 1);
    }

    #[test]
    fn registry_prunes_orphaned_animations() {
        let mut reg = AnimationRegistry::new();
        let anim: Rc<RefCell<dyn Animate>> = Rc::new(RefCell::new(CountingAnim { ticks: 0 }));
        reg.register(anim);
        // The only external handle was dropped above (moved into register
        // and returned unbound), so prune clears it.
        reg.prune();
        assert!(reg.is_empty());
    }
}
