#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Water Rush engine.
//!
//! This crate defines the message surface that connects adapters, the
//! authoritative session, and pure systems. Adapters submit [`Command`] values
//! describing desired mutations, the session executes those commands via its
//! `apply` entry point, and then broadcasts [`Event`] values for presentation
//! layers to render. Timing, randomness and persistence are reached through the
//! [`Scheduler`], [`RandomSource`] and [`MilestoneStore`] traits so that hosts
//! can substitute virtual clocks and seeded generators.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delay between a session starting and its first spawn wave.
pub const DEFAULT_WARM_UP: Duration = Duration::from_millis(700);

/// Delay between a token being hit and its cell returning to empty.
pub const DEFAULT_CLEAR_DELAY: Duration = Duration::from_millis(200);

/// Period of the countdown tick.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Remaining seconds at or below which the countdown is flagged as low.
pub const LOW_TIME_SECONDS: u32 = 10;

/// Remaining seconds at or below which the countdown is flagged as a warning.
pub const WARNING_TIME_SECONDS: u32 = 20;

const WIDE_VIEWPORT: u32 = 1024;
const MEDIUM_VIEWPORT: u32 = 768;

/// Named difficulty levels selectable before a session starts.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Generous time limit and a forgiving token mix.
    Easy,
    /// Default difficulty.
    #[default]
    Normal,
    /// Short countdown with frequent bad tokens.
    Hard,
}

impl Difficulty {
    /// Every difficulty in ascending order.
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Normal, Self::Hard];

    /// Stable lowercase name used for persistence keys and adapters.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Normal => "normal",
            Self::Hard => "hard",
        }
    }

    /// Tuning profile associated with the difficulty.
    #[must_use]
    pub fn profile(self) -> &'static DifficultyProfile {
        match self {
            Self::Easy => &PROFILES[0],
            Self::Normal => &PROFILES[1],
            Self::Hard => &PROFILES[2],
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Difficulty {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DifficultyProfile::get(value).map(DifficultyProfile::difficulty)
    }
}

/// Immutable bundle of tunable constants for one difficulty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DifficultyProfile {
    difficulty: Difficulty,
    win_score: u32,
    time_limit_seconds: u32,
    spawn_interval_min_ms: u32,
    spawn_interval_max_ms: u32,
    bad_chance: f64,
    multi_spawn_chance: f64,
}

static PROFILES: [DifficultyProfile; 3] = [
    DifficultyProfile {
        difficulty: Difficulty::Easy,
        win_score: 30,
        time_limit_seconds: 60,
        spawn_interval_min_ms: 900,
        spawn_interval_max_ms: 1_600,
        bad_chance: 0.15,
        multi_spawn_chance: 0.10,
    },
    DifficultyProfile {
        difficulty: Difficulty::Normal,
        win_score: 25,
        time_limit_seconds: 45,
        spawn_interval_min_ms: 800,
        spawn_interval_max_ms: 1_400,
        bad_chance: 0.20,
        multi_spawn_chance: 0.20,
    },
    DifficultyProfile {
        difficulty: Difficulty::Hard,
        win_score: 20,
        time_limit_seconds: 30,
        spawn_interval_min_ms: 550,
        spawn_interval_max_ms: 1_000,
        bad_chance: 0.30,
        multi_spawn_chance: 0.35,
    },
];

impl DifficultyProfile {
    /// Looks up a profile by its difficulty name.
    ///
    /// Names are matched case-insensitively after trimming whitespace.
    pub fn get(name: &str) -> Result<&'static Self, ConfigError> {
        let wanted = name.trim();
        PROFILES
            .iter()
            .find(|profile| profile.difficulty.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownDifficulty(name.to_owned()))
    }

    /// Iterator over the static profile table in ascending difficulty.
    pub fn all() -> impl Iterator<Item = &'static DifficultyProfile> {
        PROFILES.iter()
    }

    /// Difficulty this profile configures.
    #[must_use]
    pub const fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    /// Score a session must reach by the end of the countdown to win.
    #[must_use]
    pub const fn win_score(&self) -> u32 {
        self.win_score
    }

    /// Countdown length in whole seconds.
    #[must_use]
    pub const fn time_limit_seconds(&self) -> u32 {
        self.time_limit_seconds
    }

    /// Shortest delay between spawn waves in milliseconds.
    #[must_use]
    pub const fn spawn_interval_min_ms(&self) -> u32 {
        self.spawn_interval_min_ms
    }

    /// Longest delay between spawn waves in milliseconds.
    #[must_use]
    pub const fn spawn_interval_max_ms(&self) -> u32 {
        self.spawn_interval_max_ms
    }

    /// Probability that a spawned token is bad.
    #[must_use]
    pub const fn bad_chance(&self) -> f64 {
        self.bad_chance
    }

    /// Probability that a wave places two tokens instead of one.
    #[must_use]
    pub const fn multi_spawn_chance(&self) -> f64 {
        self.multi_spawn_chance
    }
}

/// Kind of token occupying a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Token that awards points when hit.
    Good,
    /// Token that costs points when hit.
    Bad,
}

/// Visible contents of a single grid cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CellState {
    /// Nothing to hit.
    #[default]
    Empty,
    /// Cell holds a token of the given kind.
    Token(TokenKind),
}

/// Column and row arrangement of the play grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridLayout {
    columns: u32,
    rows: u32,
}

impl GridLayout {
    /// Creates a layout with explicit dimensions.
    #[must_use]
    pub const fn new(columns: u32, rows: u32) -> Self {
        Self { columns, rows }
    }

    /// Derives the layout used for a viewport of the provided pixel width.
    #[must_use]
    pub const fn from_viewport_width(width: u32) -> Self {
        if width >= WIDE_VIEWPORT {
            Self::new(5, 3)
        } else if width >= MEDIUM_VIEWPORT {
            Self::new(4, 3)
        } else {
            Self::new(3, 3)
        }
    }

    /// Number of columns.
    #[must_use]
    pub const fn columns(&self) -> u32 {
        self.columns
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Total number of addressable cells.
    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::from_viewport_width(0)
    }
}

/// Lifecycle phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No timers running and the grid is inert.
    Idle,
    /// Countdown and spawn loop are active and cells accept hits.
    Running,
    /// Countdown finished; the outcome has been computed.
    Ended,
}

/// Scoring strategy applied to token hits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Every good hit is worth one point and every bad hit costs one.
    #[default]
    Flat,
    /// Good hits are worth more while the player keeps a streak going.
    StreakBonus,
}

/// Session-wide configuration chosen by the host before play begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Difficulty used until the player picks another one.
    pub difficulty: Difficulty,
    /// Scoring strategy applied to every hit.
    pub scoring: ScoringMode,
    /// Whether waves may place a second token.
    pub multi_spawn: bool,
    /// Delay between `Start` and the first spawn wave.
    pub warm_up: Duration,
    /// Delay between a hit and the cell visibly clearing.
    pub clear_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::default(),
            scoring: ScoringMode::default(),
            multi_spawn: true,
            warm_up: DEFAULT_WARM_UP,
            clear_delay: DEFAULT_CLEAR_DELAY,
        }
    }
}

/// Monotonic counter distinguishing one session run from the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    /// Creates a generation with the provided numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the generation.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Returns the generation that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Work a scheduled timer performs when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// One-second countdown step.
    Tick,
    /// Replace the current wave with a freshly planned one.
    SpawnWave,
    /// Return a hit cell to empty.
    ClearCell {
        /// Index of the cell to clear.
        index: usize,
        /// Wave that placed the token that was hit.
        wave: u64,
    },
}

/// Timer payload tagged with the generation that requested it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timer {
    /// Session generation that scheduled the timer.
    pub generation: Generation,
    /// Work to perform when the timer fires.
    pub kind: TimerKind,
}

impl Timer {
    /// Creates a new timer payload.
    #[must_use]
    pub const fn new(generation: Generation, kind: TimerKind) -> Self {
        Self { generation, kind }
    }
}

/// Opaque identifier returned by a [`Scheduler`] for later cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Creates a handle from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric value of the handle.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// Host-provided timer service.
///
/// Fired timers are delivered back to the session as [`Command::FireTimer`].
pub trait Scheduler {
    /// Requests a single delivery of `timer` after `delay`.
    fn schedule_once(&mut self, delay: Duration, timer: Timer) -> TimerHandle;

    /// Requests delivery of `timer` every `period` until cancelled.
    fn schedule_repeating(&mut self, period: Duration, timer: Timer) -> TimerHandle;

    /// Cancels a pending timer. Unknown handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);

    /// Current host time, measured from an arbitrary origin.
    fn now(&self) -> Duration;
}

/// Source of uniformly distributed floats used by spawning.
pub trait RandomSource {
    /// Returns a value in `[0, 1)`.
    fn next_float(&mut self) -> f64;
}

/// Errors surfaced by a [`MilestoneStore`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The stored best score could not be read.
    #[error("failed to read best score for {difficulty}: {reason}")]
    Read {
        /// Difficulty whose record was requested.
        difficulty: Difficulty,
        /// Human readable failure description.
        reason: String,
    },
    /// The new best score could not be written.
    #[error("failed to write best score for {difficulty}: {reason}")]
    Write {
        /// Difficulty whose record was being updated.
        difficulty: Difficulty,
        /// Human readable failure description.
        reason: String,
    },
}

/// Persistence of the best score achieved per difficulty.
pub trait MilestoneStore {
    /// Best score recorded for `difficulty`, or zero when none exists.
    fn best(&self, difficulty: Difficulty) -> Result<u32, StoreError>;

    /// Records `score` as the best for `difficulty`.
    fn set_best(&mut self, difficulty: Difficulty, score: u32) -> Result<(), StoreError>;
}

/// Commands that express all permissible session mutations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Begins a new session at the provided difficulty.
    Start {
        /// Difficulty to play.
        difficulty: Difficulty,
    },
    /// Reports that the player tapped a cell.
    ActivateCell {
        /// Index of the tapped cell.
        index: usize,
    },
    /// Returns the session to idle and cancels every pending timer.
    Reset,
    /// Reports a viewport resize.
    Resize {
        /// New viewport width in pixels.
        width: u32,
    },
    /// Selects the difficulty used by the next `Start`.
    SetDifficulty {
        /// Difficulty to select.
        difficulty: Difficulty,
    },
    /// Delivers a timer previously requested from the [`Scheduler`].
    FireTimer {
        /// Timer that came due.
        timer: Timer,
    },
}

impl Command {
    /// Discriminant used when reporting rejected commands.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Start { .. } => CommandKind::Start,
            Self::ActivateCell { .. } => CommandKind::ActivateCell,
            Self::Reset => CommandKind::Reset,
            Self::Resize { .. } => CommandKind::Resize,
            Self::SetDifficulty { .. } => CommandKind::SetDifficulty,
            Self::FireTimer { timer } => match timer.kind {
                TimerKind::Tick => CommandKind::Tick,
                TimerKind::SpawnWave => CommandKind::SpawnWave,
                TimerKind::ClearCell { .. } => CommandKind::ClearCell,
            },
        }
    }
}

/// Payload-free command discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// [`Command::Start`].
    Start,
    /// [`Command::ActivateCell`].
    ActivateCell,
    /// [`Command::Reset`].
    Reset,
    /// [`Command::Resize`].
    Resize,
    /// [`Command::SetDifficulty`].
    SetDifficulty,
    /// Countdown timer delivery.
    Tick,
    /// Spawn wave timer delivery.
    SpawnWave,
    /// Cell clear timer delivery.
    ClearCell,
}

/// Final result of a finished session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionOutcome {
    /// Whether the score reached the profile's win threshold.
    pub is_win: bool,
    /// Final score.
    pub score: u32,
    /// Score required to win.
    pub win_score: u32,
    /// Score as a rounded percentage of clicks, 0 when nothing was hit.
    pub accuracy: u32,
    /// Longest run of consecutive good hits.
    pub max_streak: u32,
    /// Best score on record for the difficulty after this session.
    pub personal_best: u32,
    /// Whether this session set a new best score.
    pub is_new_milestone: bool,
}

/// Notifications broadcast by the session after processing commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A session entered the running phase.
    SessionStarted {
        /// Difficulty being played.
        difficulty: Difficulty,
        /// Initial score.
        score: u32,
        /// Initial countdown value in seconds.
        time_remaining: u32,
        /// Best score previously recorded for the difficulty.
        personal_best: u32,
    },
    /// The countdown advanced.
    Ticked {
        /// Seconds left on the countdown.
        time_remaining: u32,
        /// Countdown is at or below [`LOW_TIME_SECONDS`].
        low_time: bool,
        /// Countdown is at or below [`WARNING_TIME_SECONDS`].
        warning: bool,
    },
    /// A cell's visible contents changed.
    CellChanged {
        /// Index of the cell.
        index: usize,
        /// New contents of the cell.
        state: CellState,
    },
    /// A token was hit by the player.
    TokenHit {
        /// Index of the cell that was hit.
        index: usize,
        /// Kind of token that was hit.
        kind: TokenKind,
    },
    /// The score changed in response to a hit.
    ScoreChanged {
        /// Score after applying the hit.
        score: u32,
        /// Points awarded by the scoring policy before clamping.
        delta: i32,
        /// Whether the hit cost points.
        is_negative: bool,
    },
    /// The countdown expired and the outcome is final.
    SessionEnded {
        /// Result of the session.
        outcome: SessionOutcome,
    },
    /// The grid was recreated with new dimensions.
    GridResized {
        /// Number of columns.
        columns: u32,
        /// Number of rows.
        rows: u32,
        /// Total number of cells.
        cell_count: usize,
    },
    /// The session returned to idle.
    SessionReset {
        /// Difficulty selected for the next start.
        difficulty: Difficulty,
        /// Countdown value the next start will use.
        time_remaining: u32,
    },
    /// A different difficulty was selected for the next start.
    DifficultyChanged {
        /// Newly selected difficulty.
        difficulty: Difficulty,
        /// Countdown length of the new difficulty.
        time_limit: u32,
        /// Best score recorded for the new difficulty.
        personal_best: u32,
    },
}

/// Read-only snapshot of the session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionSnapshot {
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Difficulty of the current or next session.
    pub difficulty: Difficulty,
    /// Current score.
    pub score: u32,
    /// Seconds left on the countdown.
    pub time_remaining: u32,
    /// Number of tokens hit this session.
    pub total_clicks: u32,
    /// Current run of consecutive good hits.
    pub streak: u32,
    /// Longest run of consecutive good hits this session.
    pub max_streak: u32,
    /// Grid arrangement.
    pub layout: GridLayout,
    /// Host time at which the running session started.
    pub started_at: Option<Duration>,
}

/// Errors raised while resolving configuration values.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No profile exists with the provided name.
    #[error("unknown difficulty `{0}` (expected easy, normal or hard)")]
    UnknownDifficulty(String),
}

/// Reasons the session rejects a command without mutating state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The command is not permitted in the current phase.
    #[error("{command:?} is not permitted while {phase:?}")]
    InvalidTransition {
        /// Command that was rejected.
        command: CommandKind,
        /// Phase the session was in.
        phase: Phase,
    },
    /// The targeted cell holds no hittable token.
    #[error("cell {index} holds no active token")]
    InactiveCell {
        /// Index of the targeted cell.
        index: usize,
    },
}
