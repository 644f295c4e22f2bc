#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Spawning system responsible for planning token waves.
//!
//! Every random decision is drawn from an injected [`RandomSource`], so a
//! seeded source yields the same waves and delays on every run.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use water_rush_core::{DifficultyProfile, GridLayout, RandomSource, TokenKind};

const SINGLE_WAVE: usize = 1;
const MULTI_WAVE: usize = 2;
const MAX_REJECTIONS: usize = 32;

/// Token placement chosen for one cell of a wave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Placement {
    /// Index of the cell receiving the token.
    pub index: usize,
    /// Kind of token placed in the cell.
    pub kind: TokenKind,
}

/// ChaCha-backed random source seeded from a single integer.
#[derive(Clone, Debug)]
pub struct SeededRandom {
    rng: ChaCha8Rng,
}

impl SeededRandom {
    /// Creates a source whose sequence is fully determined by `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_float(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Pure system that plans spawn waves and the delays between them.
#[derive(Debug)]
pub struct Spawning<R> {
    rng: R,
}

impl<R: RandomSource> Spawning<R> {
    /// Creates a spawning system drawing from the provided source.
    #[must_use]
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Plans one wave for `layout`, replacing the contents of `out`.
    ///
    /// A wave holds one token, or two with probability
    /// `profile.multi_spawn_chance()` when `multi_spawn` is enabled, never more
    /// than the layout has cells. Each token is independently bad with
    /// probability `profile.bad_chance()`.
    pub fn plan_wave(
        &mut self,
        layout: GridLayout,
        profile: &DifficultyProfile,
        multi_spawn: bool,
        out: &mut Vec<Placement>,
    ) {
        out.clear();

        let cell_count = layout.cell_count();
        if cell_count == 0 {
            return;
        }

        let requested = if multi_spawn && self.rng.next_float() < profile.multi_spawn_chance() {
            MULTI_WAVE
        } else {
            SINGLE_WAVE
        };
        let count = requested.min(cell_count);

        for _ in 0..count {
            let index = self.select_free_cell(cell_count, out);
            let kind = if self.rng.next_float() < profile.bad_chance() {
                TokenKind::Bad
            } else {
                TokenKind::Good
            };
            out.push(Placement { index, kind });
        }
    }

    /// Samples the delay until the next wave, uniform over the profile's
    /// inclusive millisecond range.
    pub fn next_delay(&mut self, profile: &DifficultyProfile) -> Duration {
        let min = profile.spawn_interval_min_ms();
        let max = profile.spawn_interval_max_ms().max(min);
        let span = u64::from(max - min) + 1;
        let offset = scale(self.rng.next_float(), span);
        Duration::from_millis(u64::from(min) + offset)
    }

    fn select_free_cell(&mut self, cell_count: usize, taken: &[Placement]) -> usize {
        debug_assert!(taken.len() < cell_count, "select_free_cell requires a free cell");
        let is_taken = |index: usize| taken.iter().any(|placement| placement.index == index);

        let mut candidate = 0;
        for _ in 0..MAX_REJECTIONS {
            candidate = scale(self.rng.next_float(), cell_count as u64) as usize;
            if !is_taken(candidate) {
                return candidate;
            }
        }

        // Degenerate sources keep landing on taken cells; walk forward instead.
        (0..cell_count)
            .map(|offset| (candidate + offset) % cell_count)
            .find(|index| !is_taken(*index))
            .unwrap_or(candidate)
    }
}

fn scale(value: f64, span: u64) -> u64 {
    let clamped = value.clamp(0.0, 1.0);
    let scaled = (clamped * span as f64) as u64;
    scaled.min(span.saturating_sub(1))
}
