#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative session state management for Water Rush.

pub mod clock;

use std::{mem, time::Duration};

use tracing::{debug, info, trace, warn};
use water_rush_core::{
    CellState, Command, CommandKind, Difficulty, DifficultyProfile, Event, Generation,
    GridLayout, MilestoneStore, Phase, RandomSource, Scheduler, SessionConfig, SessionError,
    SessionOutcome, Timer, TimerHandle, TimerKind, TokenKind, LOW_TIME_SECONDS, TICK_PERIOD,
    WARNING_TIME_SECONDS,
};
use water_rush_system_scoring::{apply_delta, ScoringPolicy};
use water_rush_system_spawning::{Placement, Spawning};

pub use clock::{advance, VirtualClock};

/// Single grid cell tracked by the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    state: CellState,
    consumed: bool,
    wave: u64,
}

impl Cell {
    /// Visible contents of the cell.
    #[must_use]
    pub const fn state(&self) -> CellState {
        self.state
    }

    /// Whether the token in the cell was already hit.
    #[must_use]
    pub const fn is_consumed(&self) -> bool {
        self.consumed
    }

    fn active_token(&self) -> Option<TokenKind> {
        match self.state {
            CellState::Token(kind) if !self.consumed => Some(kind),
            _ => None,
        }
    }
}

/// Collaborators the session reaches while applying a command.
pub struct Ports<'a> {
    /// Timer service used for the countdown, spawn loop and cell clears.
    pub scheduler: &'a mut dyn Scheduler,
    /// Best-score persistence.
    pub milestones: &'a mut dyn MilestoneStore,
}

impl<'a> Ports<'a> {
    /// Bundles the provided collaborators.
    #[must_use]
    pub fn new(scheduler: &'a mut dyn Scheduler, milestones: &'a mut dyn MilestoneStore) -> Self {
        Self {
            scheduler,
            milestones,
        }
    }
}

#[derive(Debug, Default)]
struct PendingTimers {
    tick: Option<TimerHandle>,
    spawn: Option<TimerHandle>,
    clears: Vec<PendingClear>,
}

#[derive(Clone, Copy, Debug)]
struct PendingClear {
    handle: TimerHandle,
    index: usize,
    wave: u64,
}

/// Represents the authoritative state of one player's game session.
#[derive(Debug)]
pub struct Session<R> {
    config: SessionConfig,
    profile: &'static DifficultyProfile,
    phase: Phase,
    score: u32,
    time_remaining: u32,
    total_clicks: u32,
    streak: u32,
    max_streak: u32,
    started_at: Option<Duration>,
    generation: Generation,
    layout: GridLayout,
    cells: Vec<Cell>,
    wave: u64,
    timers: PendingTimers,
    spawning: Spawning<R>,
    scoring: ScoringPolicy,
    wave_scratch: Vec<Placement>,
}

impl<R: RandomSource> Session<R> {
    /// Creates an idle session on the provided layout.
    #[must_use]
    pub fn new(config: SessionConfig, rng: R, layout: GridLayout) -> Self {
        let profile = config.difficulty.profile();
        Self {
            config,
            profile,
            phase: Phase::Idle,
            score: 0,
            time_remaining: profile.time_limit_seconds(),
            total_clicks: 0,
            streak: 0,
            max_streak: 0,
            started_at: None,
            generation: Generation::default(),
            layout,
            cells: vec![Cell::default(); layout.cell_count()],
            wave: 0,
            timers: PendingTimers::default(),
            spawning: Spawning::new(rng),
            scoring: ScoringPolicy::new(config.scoring),
            wave_scratch: Vec::new(),
        }
    }

    fn require(&self, command: CommandKind, allowed: &[Phase]) -> Result<(), SessionError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                command,
                phase: self.phase,
            })
        }
    }

    fn timer(&self, kind: TimerKind) -> Timer {
        Timer::new(self.generation, kind)
    }

    fn restore_defaults(&mut self) {
        self.score = 0;
        self.time_remaining = self.profile.time_limit_seconds();
        self.total_clicks = 0;
        self.streak = 0;
        self.max_streak = 0;
    }

    fn start(
        &mut self,
        difficulty: Difficulty,
        ports: &mut Ports<'_>,
        out_events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        self.require(CommandKind::Start, &[Phase::Idle, Phase::Ended])?;

        self.cancel_timers(ports.scheduler);
        self.generation = self.generation.next();
        self.profile = difficulty.profile();
        self.restore_defaults();
        self.clear_grid(out_events);
        self.phase = Phase::Running;
        self.started_at = Some(ports.scheduler.now());

        let personal_best = read_best(&*ports.milestones, difficulty);
        self.timers.spawn = Some(
            ports
                .scheduler
                .schedule_once(self.config.warm_up, self.timer(TimerKind::SpawnWave)),
        );
        self.timers.tick = Some(
            ports
                .scheduler
                .schedule_repeating(TICK_PERIOD, self.timer(TimerKind::Tick)),
        );

        info!(
            %difficulty,
            generation = self.generation.get(),
            time_limit = self.time_remaining,
            "session started"
        );
        out_events.push(Event::SessionStarted {
            difficulty,
            score: self.score,
            time_remaining: self.time_remaining,
            personal_best,
        });
        Ok(())
    }

    fn tick(&mut self, ports: &mut Ports<'_>, out_events: &mut Vec<Event>) {
        self.time_remaining = self.time_remaining.saturating_sub(1);
        if self.time_remaining == 0 {
            self.end(ports, out_events);
            return;
        }

        out_events.push(Event::Ticked {
            time_remaining: self.time_remaining,
            low_time: self.time_remaining <= LOW_TIME_SECONDS,
            warning: self.time_remaining <= WARNING_TIME_SECONDS,
        });
    }

    fn activate_cell(
        &mut self,
        index: usize,
        scheduler: &mut dyn Scheduler,
        out_events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        self.require(CommandKind::ActivateCell, &[Phase::Running])?;

        let cell = self
            .cells
            .get_mut(index)
            .ok_or(SessionError::InactiveCell { index })?;
        let kind = cell
            .active_token()
            .ok_or(SessionError::InactiveCell { index })?;
        cell.consumed = true;
        let wave = cell.wave;

        self.total_clicks = self.total_clicks.saturating_add(1);
        let change = self.scoring.score_hit(kind, self.streak);
        self.streak = change.streak;
        self.max_streak = self.max_streak.max(change.streak);
        self.score = apply_delta(self.score, change.delta);

        out_events.push(Event::TokenHit { index, kind });
        out_events.push(Event::ScoreChanged {
            score: self.score,
            delta: change.delta,
            is_negative: change.delta < 0,
        });

        let handle = scheduler.schedule_once(
            self.config.clear_delay,
            self.timer(TimerKind::ClearCell { index, wave }),
        );
        self.timers.clears.push(PendingClear {
            handle,
            index,
            wave,
        });
        Ok(())
    }

    fn spawn_wave(&mut self, scheduler: &mut dyn Scheduler, out_events: &mut Vec<Event>) {
        self.timers.spawn = None;
        self.clear_grid(out_events);

        let mut plan = mem::take(&mut self.wave_scratch);
        self.spawning
            .plan_wave(self.layout, self.profile, self.config.multi_spawn, &mut plan);
        for placement in &plan {
            if let Some(cell) = self.cells.get_mut(placement.index) {
                cell.state = CellState::Token(placement.kind);
                cell.wave = self.wave;
                out_events.push(Event::CellChanged {
                    index: placement.index,
                    state: cell.state,
                });
            }
        }
        debug!(wave = self.wave, tokens = plan.len(), "spawn wave placed");
        self.wave_scratch = plan;

        let delay = self.spawning.next_delay(self.profile);
        self.timers.spawn =
            Some(scheduler.schedule_once(delay, self.timer(TimerKind::SpawnWave)));
    }

    fn clear_cell(&mut self, index: usize, wave: u64, out_events: &mut Vec<Event>) {
        self.timers
            .clears
            .retain(|pending| !(pending.index == index && pending.wave == wave));

        let Some(cell) = self.cells.get_mut(index) else {
            return;
        };
        if cell.wave != wave || !cell.consumed {
            trace!(index, wave, "dropping clear for a replaced token");
            return;
        }

        *cell = Cell {
            wave: cell.wave,
            ..Cell::default()
        };
        out_events.push(Event::CellChanged {
            index,
            state: CellState::Empty,
        });
    }

    fn end(&mut self, ports: &mut Ports<'_>, out_events: &mut Vec<Event>) {
        self.cancel_timers(ports.scheduler);
        self.phase = Phase::Ended;

        let difficulty = self.profile.difficulty();
        let score = self.score;
        let (personal_best, is_new_milestone) = match ports.milestones.best(difficulty) {
            Ok(prior) if score > prior => match ports.milestones.set_best(difficulty, score) {
                Ok(()) => (score, true),
                Err(error) => {
                    warn!(%error, "best score not updated");
                    (prior, false)
                }
            },
            Ok(prior) => (prior, false),
            Err(error) => {
                warn!(%error, "best score unavailable");
                (0, false)
            }
        };

        let outcome = SessionOutcome {
            is_win: score >= self.profile.win_score(),
            score,
            win_score: self.profile.win_score(),
            accuracy: accuracy_percent(score, self.total_clicks),
            max_streak: self.max_streak,
            personal_best,
            is_new_milestone,
        };
        info!(
            %difficulty,
            score,
            is_win = outcome.is_win,
            is_new_milestone,
            "session ended"
        );
        out_events.push(Event::SessionEnded { outcome });
    }

    fn reset(&mut self, scheduler: &mut dyn Scheduler, out_events: &mut Vec<Event>) {
        self.cancel_timers(scheduler);
        self.generation = self.generation.next();
        self.phase = Phase::Idle;
        self.restore_defaults();
        self.started_at = None;
        self.clear_grid(out_events);

        debug!(generation = self.generation.get(), "session reset");
        out_events.push(Event::SessionReset {
            difficulty: self.profile.difficulty(),
            time_remaining: self.time_remaining,
        });
    }

    fn resize(&mut self, layout: GridLayout, out_events: &mut Vec<Event>) {
        if layout.columns() == self.layout.columns()
            && layout.cell_count() == self.layout.cell_count()
        {
            return;
        }

        self.layout = layout;
        self.wave = self.wave.wrapping_add(1);
        self.cells = vec![Cell::default(); layout.cell_count()];

        debug!(
            columns = layout.columns(),
            rows = layout.rows(),
            phase = ?self.phase,
            "grid recreated"
        );
        out_events.push(Event::GridResized {
            columns: layout.columns(),
            rows: layout.rows(),
            cell_count: layout.cell_count(),
        });
    }

    fn set_difficulty(
        &mut self,
        difficulty: Difficulty,
        milestones: &dyn MilestoneStore,
        out_events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        self.require(CommandKind::SetDifficulty, &[Phase::Idle, Phase::Ended])?;

        self.profile = difficulty.profile();
        if self.phase == Phase::Idle {
            self.time_remaining = self.profile.time_limit_seconds();
        }

        out_events.push(Event::DifficultyChanged {
            difficulty,
            time_limit: self.profile.time_limit_seconds(),
            personal_best: read_best(milestones, difficulty),
        });
        Ok(())
    }

    fn fire(
        &mut self,
        timer: Timer,
        ports: &mut Ports<'_>,
        out_events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        if timer.generation != self.generation {
            trace!(
                stale = timer.generation.get(),
                current = self.generation.get(),
                "dropping stale timer"
            );
            return Ok(());
        }

        match timer.kind {
            TimerKind::Tick => {
                self.require(CommandKind::Tick, &[Phase::Running])?;
                self.tick(ports, out_events);
            }
            TimerKind::SpawnWave => {
                self.require(CommandKind::SpawnWave, &[Phase::Running])?;
                self.spawn_wave(ports.scheduler, out_events);
            }
            TimerKind::ClearCell { index, wave } => {
                self.require(CommandKind::ClearCell, &[Phase::Running])?;
                self.clear_cell(index, wave, out_events);
            }
        }
        Ok(())
    }

    fn clear_grid(&mut self, out_events: &mut Vec<Event>) {
        self.wave = self.wave.wrapping_add(1);
        for (index, cell) in self.cells.iter_mut().enumerate() {
            if cell.state != CellState::Empty {
                out_events.push(Event::CellChanged {
                    index,
                    state: CellState::Empty,
                });
            }
            *cell = Cell::default();
        }
    }

    fn cancel_timers(&mut self, scheduler: &mut dyn Scheduler) {
        let timers = mem::take(&mut self.timers);
        for handle in timers
            .tick
            .into_iter()
            .chain(timers.spawn)
            .chain(timers.clears.into_iter().map(|pending| pending.handle))
        {
            scheduler.cancel(handle);
        }
    }
}

fn read_best(milestones: &dyn MilestoneStore, difficulty: Difficulty) -> u32 {
    milestones.best(difficulty).unwrap_or_else(|error| {
        warn!(%error, "best score unavailable");
        0
    })
}

/// Score as a rounded percentage of clicks. Streak bonuses can push it past 100.
fn accuracy_percent(score: u32, total_clicks: u32) -> u32 {
    if total_clicks == 0 {
        return 0;
    }
    (f64::from(score) / f64::from(total_clicks) * 100.0).round() as u32
}

/// Applies the provided command to the session, mutating state deterministically.
///
/// Commands issued in a phase that forbids them are rejected without touching
/// state or emitting events. Timers from an earlier generation are dropped.
pub fn apply<R: RandomSource>(
    session: &mut Session<R>,
    command: Command,
    ports: &mut Ports<'_>,
    out_events: &mut Vec<Event>,
) -> Result<(), SessionError> {
    match command {
        Command::Start { difficulty } => session.start(difficulty, ports, out_events),
        Command::ActivateCell { index } => {
            session.activate_cell(index, ports.scheduler, out_events)
        }
        Command::Reset => {
            session.reset(ports.scheduler, out_events);
            Ok(())
        }
        Command::Resize { width } => {
            session.resize(GridLayout::from_viewport_width(width), out_events);
            Ok(())
        }
        Command::SetDifficulty { difficulty } => {
            session.set_difficulty(difficulty, &*ports.milestones, out_events)
        }
        Command::FireTimer { timer } => session.fire(timer, ports, out_events),
    }
}

/// Query functions that provide read-only access to the session state.
pub mod query {
    use water_rush_core::{
        CellState, DifficultyProfile, Generation, GridLayout, Phase, SessionConfig,
        SessionSnapshot,
    };

    use super::{Cell, Session};

    /// Captures a read-only snapshot of the session counters.
    #[must_use]
    pub fn snapshot<R>(session: &Session<R>) -> SessionSnapshot {
        SessionSnapshot {
            phase: session.phase,
            difficulty: session.profile.difficulty(),
            score: session.score,
            time_remaining: session.time_remaining,
            total_clicks: session.total_clicks,
            streak: session.streak,
            max_streak: session.max_streak,
            layout: session.layout,
            started_at: session.started_at,
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase<R>(session: &Session<R>) -> Phase {
        session.phase
    }

    /// Current grid arrangement.
    #[must_use]
    pub fn layout<R>(session: &Session<R>) -> GridLayout {
        session.layout
    }

    /// Provides read-only access to every cell in index order.
    #[must_use]
    pub fn cells<R>(session: &Session<R>) -> &[Cell] {
        &session.cells
    }

    /// Visible contents of every cell in index order.
    #[must_use]
    pub fn cell_states<R>(session: &Session<R>) -> Vec<CellState> {
        session.cells.iter().map(Cell::state).collect()
    }

    /// Indices of cells holding a token that can still be hit.
    #[must_use]
    pub fn active_tokens<R>(session: &Session<R>) -> Vec<usize> {
        session
            .cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.active_token().is_some())
            .map(|(index, _)| index)
            .collect()
    }

    /// Profile of the current or next session.
    #[must_use]
    pub fn profile<R>(session: &Session<R>) -> &'static DifficultyProfile {
        session.profile
    }

    /// Configuration the session was created with.
    #[must_use]
    pub fn config<R>(session: &Session<R>) -> &SessionConfig {
        &session.config
    }

    /// Generation tag carried by timers the session schedules.
    #[must_use]
    pub fn generation<R>(session: &Session<R>) -> Generation {
        session.generation
    }
}
