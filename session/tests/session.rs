use std::time::Duration;

use water_rush_core::{
    CellState, Command, CommandKind, Difficulty, Event, Generation, GridLayout, MilestoneStore,
    Phase, RandomSource, Scheduler, ScoringMode, SessionConfig, SessionError, SessionOutcome,
    StoreError, Timer, TimerKind, TokenKind,
};
use water_rush_persistence::MemoryMilestones;
use water_rush_session::{self as session, query, Ports, Session, VirtualClock};

const STEP: Duration = Duration::from_millis(50);

/// Replays a fixed list of values, cycling when exhausted.
#[derive(Debug)]
struct ScriptedRandom {
    values: Vec<f64>,
    cursor: usize,
}

impl ScriptedRandom {
    fn new(values: &[f64]) -> Self {
        Self {
            values: values.to_vec(),
            cursor: 0,
        }
    }

    /// Every wave places one good token in cell 0 after the shortest delay.
    fn all_good() -> Self {
        Self::new(&[0.0, 0.9, 0.0])
    }
}

impl RandomSource for ScriptedRandom {
    fn next_float(&mut self) -> f64 {
        let value = self.values[self.cursor % self.values.len()];
        self.cursor += 1;
        value
    }
}

/// Store whose reads and writes can be made to fail.
#[derive(Debug, Default)]
struct FlakyMilestones {
    best: u32,
    fail_reads: bool,
    fail_writes: bool,
}

impl MilestoneStore for FlakyMilestones {
    fn best(&self, difficulty: Difficulty) -> Result<u32, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Read {
                difficulty,
                reason: "offline".to_owned(),
            });
        }
        Ok(self.best)
    }

    fn set_best(&mut self, difficulty: Difficulty, score: u32) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Write {
                difficulty,
                reason: "quota exceeded".to_owned(),
            });
        }
        self.best = score;
        Ok(())
    }
}

struct Harness<M> {
    session: Session<ScriptedRandom>,
    clock: VirtualClock,
    milestones: M,
    events: Vec<Event>,
}

impl Harness<MemoryMilestones> {
    fn new(config: SessionConfig, rng: ScriptedRandom, width: u32) -> Self {
        Self::with_store(config, rng, width, MemoryMilestones::new())
    }
}

impl<M: MilestoneStore> Harness<M> {
    fn with_store(config: SessionConfig, rng: ScriptedRandom, width: u32, milestones: M) -> Self {
        let layout = GridLayout::from_viewport_width(width);
        Self {
            session: Session::new(config, rng, layout),
            clock: VirtualClock::new(),
            milestones,
            events: Vec::new(),
        }
    }

    fn command(&mut self, command: Command) -> Result<(), SessionError> {
        let mut ports = Ports::new(&mut self.clock, &mut self.milestones);
        session::apply(&mut self.session, command, &mut ports, &mut self.events)
    }

    fn advance(&mut self, dt: Duration) {
        session::advance(
            &mut self.session,
            &mut self.clock,
            &mut self.milestones,
            dt,
            &mut self.events,
        );
    }

    fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Waits for the next hittable token and taps it.
    fn hit_next_token(&mut self) -> usize {
        for _ in 0..200 {
            if let Some(index) = query::active_tokens(&self.session).first().copied() {
                self.command(Command::ActivateCell { index })
                    .expect("active token accepts a hit");
                return index;
            }
            self.advance(STEP);
        }
        panic!("no token appeared within ten seconds");
    }

    fn finish(&mut self) -> SessionOutcome {
        for _ in 0..2_000 {
            if query::phase(&self.session) == Phase::Ended {
                break;
            }
            self.advance(STEP);
        }
        self.events
            .iter()
            .rev()
            .find_map(|event| match event {
                Event::SessionEnded { outcome } => Some(*outcome),
                _ => None,
            })
            .expect("session ended")
    }
}

fn flat_config(difficulty: Difficulty) -> SessionConfig {
    SessionConfig {
        difficulty,
        multi_spawn: false,
        ..SessionConfig::default()
    }
}

fn cell_events(events: &[Event]) -> Vec<(usize, CellState)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::CellChanged { index, state } => Some((*index, *state)),
            _ => None,
        })
        .collect()
}

#[test]
fn new_session_is_idle_with_profile_defaults() {
    let harness = Harness::new(flat_config(Difficulty::Easy), ScriptedRandom::all_good(), 500);
    let snapshot = query::snapshot(&harness.session);

    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.difficulty, Difficulty::Easy);
    assert_eq!(snapshot.score, 0);
    assert_eq!(snapshot.time_remaining, 60);
    assert_eq!(snapshot.layout.cell_count(), 9);
    assert_eq!(snapshot.started_at, None);
    assert!(query::cell_states(&harness.session)
        .iter()
        .all(|state| *state == CellState::Empty));
}

#[test]
fn start_notifies_and_waits_for_warm_up_before_spawning() {
    let mut harness = Harness::with_store(
        flat_config(Difficulty::Easy),
        ScriptedRandom::all_good(),
        500,
        MemoryMilestones::new().with_best(Difficulty::Easy, 17),
    );
    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start from idle");

    assert_eq!(
        harness.take_events(),
        vec![Event::SessionStarted {
            difficulty: Difficulty::Easy,
            score: 0,
            time_remaining: 60,
            personal_best: 17,
        }]
    );
    assert_eq!(query::phase(&harness.session), Phase::Running);
    assert_eq!(harness.clock.pending(), 2, "tick and first wave scheduled");

    harness.advance(Duration::from_millis(699));
    assert!(cell_events(&harness.take_events()).is_empty());

    harness.advance(Duration::from_millis(1));
    assert_eq!(
        cell_events(&harness.take_events()),
        vec![(0, CellState::Token(TokenKind::Good))]
    );
}

#[test]
fn countdown_ticks_down_by_one_and_ends_exactly_at_zero() {
    let mut harness = Harness::new(flat_config(Difficulty::Hard), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Hard,
        })
        .expect("start");
    let _ = harness.take_events();

    harness.advance(Duration::from_millis(29_999));
    assert_eq!(query::phase(&harness.session), Phase::Running);
    assert_eq!(query::snapshot(&harness.session).time_remaining, 1);

    let ticks: Vec<(u32, bool, bool)> = harness
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Ticked {
                time_remaining,
                low_time,
                warning,
            } => Some((time_remaining, low_time, warning)),
            _ => None,
        })
        .collect();
    let expected: Vec<(u32, bool, bool)> = (1..=29)
        .rev()
        .map(|remaining| (remaining, remaining <= 10, remaining <= 20))
        .collect();
    assert_eq!(ticks, expected);

    harness.advance(Duration::from_millis(1));
    assert_eq!(query::phase(&harness.session), Phase::Ended);
    assert_eq!(query::snapshot(&harness.session).time_remaining, 0);
    let events = harness.take_events();
    assert!(
        !events.iter().any(|event| matches!(event, Event::Ticked { .. })),
        "the final tick ends the session instead of notifying"
    );
    assert!(matches!(events.last(), Some(Event::SessionEnded { .. })));
    assert_eq!(harness.clock.pending(), 0, "end cancels every timer");

    harness.advance(Duration::from_secs(5));
    assert!(harness.take_events().is_empty());
}

#[test]
fn good_then_bad_hit_returns_score_to_zero_and_clamps() {
    // Waves alternate: good token in cell 0, then bad token in cell 4.
    let rng = ScriptedRandom::new(&[0.0, 0.9, 0.0, 0.5, 0.0, 0.0]);
    let mut harness = Harness::new(flat_config(Difficulty::Easy), rng, 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start");

    harness.advance(Duration::from_millis(700));
    let _ = harness.take_events();
    harness
        .command(Command::ActivateCell { index: 0 })
        .expect("good hit");
    assert_eq!(
        harness.take_events(),
        vec![
            Event::TokenHit {
                index: 0,
                kind: TokenKind::Good,
            },
            Event::ScoreChanged {
                score: 1,
                delta: 1,
                is_negative: false,
            },
        ]
    );

    harness.advance(Duration::from_millis(900));
    let _ = harness.take_events();
    harness
        .command(Command::ActivateCell { index: 4 })
        .expect("bad hit");
    assert_eq!(
        harness.take_events(),
        vec![
            Event::TokenHit {
                index: 4,
                kind: TokenKind::Bad,
            },
            Event::ScoreChanged {
                score: 0,
                delta: -1,
                is_negative: true,
            },
        ]
    );

    harness.advance(Duration::from_millis(1_800));
    harness
        .command(Command::ActivateCell { index: 4 })
        .expect("second bad hit");
    let snapshot = query::snapshot(&harness.session);
    assert_eq!(snapshot.score, 0, "score is floored at zero");
    assert_eq!(snapshot.total_clicks, 3);
    assert_eq!(snapshot.streak, 0);
    assert_eq!(snapshot.max_streak, 1);
}

#[test]
fn thirty_good_hits_win_on_easy_without_ending_early() {
    let mut harness = Harness::new(flat_config(Difficulty::Easy), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start");

    for _ in 0..30 {
        let _ = harness.hit_next_token();
    }
    let snapshot = query::snapshot(&harness.session);
    assert_eq!(snapshot.score, 30);
    assert_eq!(snapshot.phase, Phase::Running, "reaching the target does not end play");
    assert!(snapshot.time_remaining > 0);

    let outcome = harness.finish();
    assert_eq!(
        outcome,
        SessionOutcome {
            is_win: true,
            score: 30,
            win_score: 30,
            accuracy: 100,
            max_streak: 30,
            personal_best: 30,
            is_new_milestone: true,
        }
    );
}

#[test]
fn falling_short_of_the_target_loses() {
    let mut harness = Harness::new(flat_config(Difficulty::Normal), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Normal,
        })
        .expect("start");
    for _ in 0..3 {
        let _ = harness.hit_next_token();
    }

    let outcome = harness.finish();
    assert!(!outcome.is_win);
    assert_eq!(outcome.score, 3);
    assert_eq!(outcome.win_score, 25);
}

#[test]
fn milestone_is_recorded_only_when_beaten() {
    let mut harness = Harness::new(flat_config(Difficulty::Hard), ScriptedRandom::all_good(), 500);
    assert_eq!(harness.milestones.best(Difficulty::Hard), Ok(0));

    harness
        .command(Command::Start {
            difficulty: Difficulty::Hard,
        })
        .expect("first start");
    for _ in 0..12 {
        let _ = harness.hit_next_token();
    }
    let first = harness.finish();
    assert_eq!(first.score, 12);
    assert!(first.is_new_milestone);
    assert_eq!(first.personal_best, 12);
    assert_eq!(harness.milestones.best(Difficulty::Hard), Ok(12));
    let _ = harness.take_events();

    harness
        .command(Command::Start {
            difficulty: Difficulty::Hard,
        })
        .expect("restart from ended");
    let started = harness
        .take_events()
        .into_iter()
        .find(|event| matches!(event, Event::SessionStarted { .. }));
    assert_eq!(
        started,
        Some(Event::SessionStarted {
            difficulty: Difficulty::Hard,
            score: 0,
            time_remaining: 30,
            personal_best: 12,
        })
    );
    for _ in 0..8 {
        let _ = harness.hit_next_token();
    }
    let second = harness.finish();
    assert_eq!(second.score, 8);
    assert!(!second.is_new_milestone);
    assert_eq!(second.personal_best, 12);
    assert_eq!(harness.milestones.best(Difficulty::Hard), Ok(12));
}

#[test]
fn failed_milestone_write_still_reports_the_outcome() {
    let store = FlakyMilestones {
        best: 3,
        fail_reads: false,
        fail_writes: true,
    };
    let mut harness = Harness::with_store(
        flat_config(Difficulty::Hard),
        ScriptedRandom::all_good(),
        500,
        store,
    );
    harness
        .command(Command::Start {
            difficulty: Difficulty::Hard,
        })
        .expect("start");
    for _ in 0..5 {
        let _ = harness.hit_next_token();
    }

    let outcome = harness.finish();
    assert_eq!(outcome.score, 5);
    assert!(!outcome.is_new_milestone);
    assert_eq!(outcome.personal_best, 3);
    assert_eq!(harness.milestones.best, 3);
}

#[test]
fn unreadable_milestones_default_to_zero() {
    let store = FlakyMilestones {
        best: 40,
        fail_reads: true,
        fail_writes: false,
    };
    let mut harness = Harness::with_store(
        flat_config(Difficulty::Hard),
        ScriptedRandom::all_good(),
        500,
        store,
    );
    harness
        .command(Command::Start {
            difficulty: Difficulty::Hard,
        })
        .expect("start");
    assert!(matches!(
        harness.take_events().first(),
        Some(Event::SessionStarted {
            personal_best: 0,
            ..
        })
    ));

    let outcome = harness.finish();
    assert!(!outcome.is_new_milestone);
    assert_eq!(
        outcome.personal_best, 0,
        "an unreadable store reports no best score"
    );
    assert_eq!(harness.milestones.best, 40, "nothing is written blindly");
}

#[test]
fn resize_mid_session_discards_tokens_and_keeps_score() {
    // Each wave: multi-spawn trial passes, tokens in the first and last cell.
    let rng = ScriptedRandom::new(&[0.0, 0.0, 0.9, 0.99, 0.9, 0.0]);
    let config = SessionConfig {
        difficulty: Difficulty::Hard,
        ..SessionConfig::default()
    };
    let mut harness = Harness::new(config, rng, 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Hard,
        })
        .expect("start");

    harness.advance(Duration::from_millis(700));
    assert_eq!(query::active_tokens(&harness.session), vec![0, 8]);
    harness
        .command(Command::ActivateCell { index: 0 })
        .expect("hit");
    let _ = harness.take_events();

    harness
        .command(Command::Resize { width: 1280 })
        .expect("resize");
    assert_eq!(
        harness.take_events(),
        vec![Event::GridResized {
            columns: 5,
            rows: 3,
            cell_count: 15,
        }]
    );
    assert_eq!(query::layout(&harness.session).cell_count(), 15);
    assert_eq!(query::cell_states(&harness.session), vec![CellState::Empty; 15]);
    assert_eq!(query::snapshot(&harness.session).score, 1);
    assert_eq!(query::phase(&harness.session), Phase::Running);

    // The pending clear belongs to the discarded grid.
    harness.advance(Duration::from_millis(200));
    assert!(cell_events(&harness.take_events()).is_empty());

    harness.advance(Duration::from_millis(350));
    assert_eq!(
        cell_events(&harness.take_events()),
        vec![
            (0, CellState::Token(TokenKind::Good)),
            (14, CellState::Token(TokenKind::Good)),
        ]
    );
}

#[test]
fn resize_to_same_layout_is_silent() {
    let mut harness = Harness::new(flat_config(Difficulty::Easy), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Resize { width: 700 })
        .expect("resize");
    assert!(harness.take_events().is_empty());

    harness
        .command(Command::Resize { width: 900 })
        .expect("resize");
    assert_eq!(
        harness.take_events(),
        vec![Event::GridResized {
            columns: 4,
            rows: 3,
            cell_count: 12,
        }]
    );
}

#[test]
fn hit_cell_clears_after_delay() {
    let mut harness = Harness::new(flat_config(Difficulty::Easy), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start");
    harness.advance(Duration::from_millis(700));
    harness
        .command(Command::ActivateCell { index: 0 })
        .expect("hit");
    let _ = harness.take_events();

    assert!(query::cells(&harness.session)[0].is_consumed());
    assert_eq!(
        harness.command(Command::ActivateCell { index: 0 }),
        Err(SessionError::InactiveCell { index: 0 }),
        "a token scores once"
    );

    harness.advance(Duration::from_millis(199));
    assert!(cell_events(&harness.take_events()).is_empty());
    harness.advance(Duration::from_millis(1));
    assert_eq!(
        cell_events(&harness.take_events()),
        vec![(0, CellState::Empty)]
    );
    assert!(!query::cells(&harness.session)[0].is_consumed());
}

#[test]
fn reset_cancels_pending_callbacks() {
    let mut harness = Harness::new(flat_config(Difficulty::Easy), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start");
    harness.advance(Duration::from_millis(700));
    harness
        .command(Command::ActivateCell { index: 0 })
        .expect("hit schedules a clear");
    let stale_generation = query::generation(&harness.session);

    harness.command(Command::Reset).expect("reset");
    let reset_events = harness.take_events();
    assert_eq!(
        reset_events.last(),
        Some(&Event::SessionReset {
            difficulty: Difficulty::Easy,
            time_remaining: 60,
        })
    );
    assert_eq!(harness.clock.pending(), 0);

    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("new session");
    let _ = harness.take_events();
    harness.advance(Duration::from_millis(200));
    assert!(harness.take_events().is_empty(), "no callback from the old session fires");

    // A host that ignores cancellation still cannot leak the old clear.
    let stale = Timer::new(stale_generation, TimerKind::ClearCell { index: 0, wave: 1 });
    harness
        .command(Command::FireTimer { timer: stale })
        .expect("stale timers are dropped");
    assert!(harness.take_events().is_empty());
}

#[test]
fn reset_is_idempotent() {
    let mut harness = Harness::new(flat_config(Difficulty::Normal), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Normal,
        })
        .expect("start");
    harness.advance(Duration::from_millis(2_500));
    let _ = harness.hit_next_token();

    harness.command(Command::Reset).expect("first reset");
    let once = query::snapshot(&harness.session);
    let cells_once = query::cell_states(&harness.session);
    harness.command(Command::Reset).expect("second reset");

    assert_eq!(query::snapshot(&harness.session), once);
    assert_eq!(query::cell_states(&harness.session), cells_once);
    assert_eq!(once.phase, Phase::Idle);
    assert_eq!(once.score, 0);
    assert_eq!(once.time_remaining, 45);
}

#[test]
fn commands_in_the_wrong_phase_are_rejected_without_effects() {
    let mut harness = Harness::new(flat_config(Difficulty::Easy), ScriptedRandom::all_good(), 500);

    assert_eq!(
        harness.command(Command::ActivateCell { index: 0 }),
        Err(SessionError::InvalidTransition {
            command: CommandKind::ActivateCell,
            phase: Phase::Idle,
        })
    );
    let tick = Timer::new(Generation::default(), TimerKind::Tick);
    assert_eq!(
        harness.command(Command::FireTimer { timer: tick }),
        Err(SessionError::InvalidTransition {
            command: CommandKind::Tick,
            phase: Phase::Idle,
        })
    );
    assert!(harness.take_events().is_empty());

    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start");
    let before = query::snapshot(&harness.session);
    let _ = harness.take_events();

    assert_eq!(
        harness.command(Command::Start {
            difficulty: Difficulty::Hard,
        }),
        Err(SessionError::InvalidTransition {
            command: CommandKind::Start,
            phase: Phase::Running,
        })
    );
    assert_eq!(
        harness.command(Command::SetDifficulty {
            difficulty: Difficulty::Hard,
        }),
        Err(SessionError::InvalidTransition {
            command: CommandKind::SetDifficulty,
            phase: Phase::Running,
        })
    );
    assert_eq!(
        harness.command(Command::ActivateCell { index: 3 }),
        Err(SessionError::InactiveCell { index: 3 }),
        "empty cell"
    );
    assert_eq!(
        harness.command(Command::ActivateCell { index: 99 }),
        Err(SessionError::InactiveCell { index: 99 }),
        "out of range"
    );

    assert!(harness.take_events().is_empty());
    assert_eq!(query::snapshot(&harness.session), before);
}

#[test]
fn set_difficulty_applies_to_the_next_start() {
    let mut harness = Harness::with_store(
        flat_config(Difficulty::Normal),
        ScriptedRandom::all_good(),
        500,
        MemoryMilestones::new().with_best(Difficulty::Hard, 9),
    );
    harness
        .command(Command::SetDifficulty {
            difficulty: Difficulty::Hard,
        })
        .expect("idle accepts difficulty");
    assert_eq!(
        harness.take_events(),
        vec![Event::DifficultyChanged {
            difficulty: Difficulty::Hard,
            time_limit: 30,
            personal_best: 9,
        }]
    );
    let snapshot = query::snapshot(&harness.session);
    assert_eq!(snapshot.difficulty, Difficulty::Hard);
    assert_eq!(snapshot.time_remaining, 30);

    harness.command(Command::Reset).expect("reset");
    assert_eq!(
        harness.take_events(),
        vec![Event::SessionReset {
            difficulty: Difficulty::Hard,
            time_remaining: 30,
        }]
    );
}

#[test]
fn set_difficulty_after_end_keeps_final_counters() {
    let mut harness = Harness::new(flat_config(Difficulty::Hard), ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Hard,
        })
        .expect("start");
    let _ = harness.hit_next_token();
    let _ = harness.finish();

    harness
        .command(Command::SetDifficulty {
            difficulty: Difficulty::Easy,
        })
        .expect("ended accepts difficulty");
    let snapshot = query::snapshot(&harness.session);
    assert_eq!(snapshot.phase, Phase::Ended);
    assert_eq!(snapshot.difficulty, Difficulty::Easy);
    assert_eq!(snapshot.score, 1);
    assert_eq!(snapshot.time_remaining, 0);
}

#[test]
fn streak_bonus_scoring_rewards_consecutive_hits() {
    let config = SessionConfig {
        scoring: ScoringMode::StreakBonus,
        ..flat_config(Difficulty::Easy)
    };
    let mut harness = Harness::new(config, ScriptedRandom::all_good(), 500);
    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start");

    for _ in 0..6 {
        let _ = harness.hit_next_token();
    }
    let deltas: Vec<i32> = harness
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            Event::ScoreChanged { delta, .. } => Some(delta),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec![1, 1, 2, 2, 3, 3]);

    let outcome = harness.finish();
    assert_eq!(outcome.score, 12);
    assert_eq!(outcome.max_streak, 6);
    assert_eq!(outcome.accuracy, 200, "score over clicks is not capped");
}

#[test]
fn started_at_tracks_the_host_clock() {
    let mut harness = Harness::new(flat_config(Difficulty::Easy), ScriptedRandom::all_good(), 500);
    harness.advance(Duration::from_secs(3));
    harness
        .command(Command::Start {
            difficulty: Difficulty::Easy,
        })
        .expect("start");

    assert_eq!(harness.clock.now(), Duration::from_secs(3));
    assert_eq!(
        query::snapshot(&harness.session).started_at,
        Some(Duration::from_secs(3))
    );
}
