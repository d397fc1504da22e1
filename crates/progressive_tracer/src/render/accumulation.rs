//! Progressive accumulation state
//!
//! While the view is unchanged each frame adds one jittered, freshly seeded
//! sample to a running average. Any change restarts the average: the frame
//! index drops to zero, the sampler seeds return to a fixed baseline and the
//! jitter is removed, so the first sample after a reset is deterministic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::foundation::math::Vec2;

/// Exclusive upper bound of the per-frame seed offset
pub const SEED_OFFSET_RANGE: i32 = 32_768;
/// Range of the per-frame seed stride
pub const SEED_INTERVAL_RANGE: std::ops::Range<i32> = 100..1000;
/// Range of the per-frame seed increment
pub const SEED_ADD_RANGE: std::ops::Range<i32> = 10..100;

/// Seeds used by the first sample after a reset
pub const BASELINE_SEEDS: SamplerSeeds = SamplerSeeds { offset: 0, interval: 100, add: 10 };

/// Parameters of the integrator's hash-based sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSeeds {
    /// Offset into the hash sequence
    pub offset: i32,
    /// Stride through the hash sequence
    pub interval: i32,
    /// Per-bounce increment
    pub add: i32,
}

impl SamplerSeeds {
    /// Packed as `[offset, interval, add]`
    pub fn to_array(self) -> [i32; 3] {
        [self.offset, self.interval, self.add]
    }
}

/// Snapshot of the accumulation state for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccumulationState {
    /// Samples already in the accumulation buffer
    pub frame_index: u32,
    /// Sub-pixel offset in normalized device units
    pub jitter: Vec2,
    /// Sampler seeds
    pub seeds: SamplerSeeds,
}

impl AccumulationState {
    /// State right after a reset
    pub const RESET: Self = Self { frame_index: 0, jitter: Vec2::ZERO, seeds: BASELINE_SEEDS };

    /// Weight of the existing average, `n / (n + 1)`
    pub fn blend_factor(&self) -> f32 {
        let n = self.frame_index as f32;
        n / (n + 1.0)
    }

    /// Whether the accumulation buffer must be cleared before the next sample
    pub fn needs_clear(&self) -> bool {
        self.frame_index == 0
    }
}

/// Advances the accumulation state once per frame
#[derive(Debug, Clone)]
pub struct AccumulationEngine {
    state: AccumulationState,
    reset_pending: bool,
    rng: StdRng,
}

impl AccumulationEngine {
    /// Engine whose first tick is a reset
    pub fn new(seed: u64) -> Self {
        Self {
            state: AccumulationState::RESET,
            reset_pending: true,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current state
    pub fn state(&self) -> AccumulationState {
        self.state
    }

    /// Force the next tick to restart accumulation
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    /// Restart accumulation now, before the next tick
    ///
    /// For when the accumulation buffer itself was replaced: whatever frame is
    /// recorded next must clear it. The reset stays queued until
    /// [`mark_cleared`](Self::mark_cleared) confirms that a clear was recorded.
    pub fn reset_now(&mut self) {
        self.state = AccumulationState::RESET;
        self.reset_pending = true;
    }

    /// A frame using the current state was recorded
    ///
    /// If that frame cleared the buffer, a queued reset has been served.
    pub fn mark_cleared(&mut self) {
        if self.state.needs_clear() {
            self.reset_pending = false;
        }
    }

    /// Whether a reset is queued
    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Advance one frame
    ///
    /// `view_changed` restarts accumulation, as does an earlier
    /// [`request_reset`](Self::request_reset). Otherwise the frame index is
    /// incremented and fresh seeds and jitter are drawn for `viewport`.
    pub fn tick(&mut self, view_changed: bool, viewport: (u32, u32)) -> AccumulationState {
        if view_changed || self.reset_pending {
            self.reset_pending = false;
            self.state = AccumulationState::RESET;
            log::trace!("Accumulation reset");
            return self.state;
        }

        let (width, height) = (viewport.0.max(1) as f32, viewport.1.max(1) as f32);
        self.state = AccumulationState {
            frame_index: self.state.frame_index.saturating_add(1),
            jitter: Vec2::new(
                self.rng.gen_range(-0.5..=0.5) / width,
                self.rng.gen_range(-0.5..=0.5) / height,
            ),
            seeds: SamplerSeeds {
                offset: self.rng.gen_range(0..SEED_OFFSET_RANGE),
                interval: self.rng.gen_range(SEED_INTERVAL_RANGE),
                add: self.rng.gen_range(SEED_ADD_RANGE),
            },
        };
        self.state
    }
}
