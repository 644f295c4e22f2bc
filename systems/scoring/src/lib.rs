#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure scoring system that converts token hits into score deltas.

use water_rush_core::{ScoringMode, TokenKind};

const BONUS_STREAK: u32 = 3;
const SUPER_STREAK: u32 = 5;

/// Result of scoring a single hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreChange {
    /// Points to add to the score; negative values subtract.
    pub delta: i32,
    /// Streak after the hit.
    pub streak: u32,
}

/// Scoring strategy selected when the session is configured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoringPolicy {
    mode: ScoringMode,
}

impl ScoringPolicy {
    /// Creates a policy that applies the provided mode.
    #[must_use]
    pub const fn new(mode: ScoringMode) -> Self {
        Self { mode }
    }

    /// Mode applied by this policy.
    #[must_use]
    pub const fn mode(&self) -> ScoringMode {
        self.mode
    }

    /// Scores a hit on a token of `kind` given the streak before the hit.
    ///
    /// Both modes count the streak so the longest run can be reported; only
    /// [`ScoringMode::StreakBonus`] lets it raise the delta.
    #[must_use]
    pub fn score_hit(&self, kind: TokenKind, streak: u32) -> ScoreChange {
        match kind {
            TokenKind::Bad => ScoreChange {
                delta: -1,
                streak: 0,
            },
            TokenKind::Good => {
                let streak = streak.saturating_add(1);
                let delta = match self.mode {
                    ScoringMode::Flat => 1,
                    ScoringMode::StreakBonus => streak_bonus(streak),
                };
                ScoreChange { delta, streak }
            }
        }
    }
}

fn streak_bonus(streak: u32) -> i32 {
    if streak >= SUPER_STREAK {
        3
    } else if streak >= BONUS_STREAK {
        2
    } else {
        1
    }
}

/// Applies `delta` to `score`, flooring the result at zero.
#[must_use]
pub fn apply_delta(score: u32, delta: i32) -> u32 {
    if delta >= 0 {
        score.saturating_add(delta.unsigned_abs())
    } else {
        score.saturating_sub(delta.unsigned_abs())
    }
}
