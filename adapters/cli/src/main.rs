#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that plays a Water Rush session on simulated time.

mod autoplay;
mod config;

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use water_rush_core::{
    CellState, Command, Difficulty, Event, GridLayout, MilestoneStore, Phase, Scheduler,
    ScoringMode, SessionOutcome, TokenKind,
};
use water_rush_persistence::{MemoryMilestones, TomlMilestones};
use water_rush_session::{self as session, query, Ports, Session, VirtualClock};
use water_rush_system_spawning::SeededRandom;

use crate::{
    autoplay::Autoplayer,
    config::{Overrides, Settings},
};

const STEP: Duration = Duration::from_millis(50);
const AUTOPLAY_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

const WIN_MESSAGES: [&str; 4] = [
    "You made a difference!",
    "Clean water for all!",
    "Amazing! You did it!",
    "You're a water hero!",
];

const LOSE_MESSAGES: [&str; 4] = [
    "Try again for a better score!",
    "Almost there, give it another go!",
    "Don't give up!",
    "Keep practicing!",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ScoringArg {
    Flat,
    StreakBonus,
}

impl From<ScoringArg> for ScoringMode {
    fn from(value: ScoringArg) -> Self {
        match value {
            ScoringArg::Flat => Self::Flat,
            ScoringArg::StreakBonus => Self::StreakBonus,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "water-rush", version, about = "Plays a timed Water Rush session")]
struct Args {
    /// Difficulty to play (easy, normal or hard).
    #[arg(long)]
    difficulty: Option<Difficulty>,
    /// Scoring policy applied to hits.
    #[arg(long, value_enum)]
    scoring: Option<ScoringArg>,
    /// Seed for token placement and the simulated player.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Viewport width in pixels used to choose the grid.
    #[arg(long, default_value_t = 800)]
    width: u32,
    /// TOML file that keeps the best score per difficulty.
    #[arg(long)]
    milestones: Option<PathBuf>,
    /// TOML file with `[session]` and `[autoplay]` tables.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Prints only the final outcome.
    #[arg(long)]
    quiet: bool,
}

/// Entry point for the Water Rush command-line interface.
fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let settings = config::load(
        args.config.as_deref(),
        Overrides {
            difficulty: args.difficulty,
            scoring: args.scoring.map(ScoringMode::from),
        },
    )?;

    let mut milestones: Box<dyn MilestoneStore> = match &args.milestones {
        Some(path) => Box::new(
            TomlMilestones::open(path)
                .with_context(|| format!("failed to open milestones at {}", path.display()))?,
        ),
        None => Box::new(MemoryMilestones::new()),
    };

    let outcome = play(&args, settings, milestones.as_mut())?;
    println!("{}", summary(&outcome, args.seed));
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn play(
    args: &Args,
    settings: Settings,
    milestones: &mut dyn MilestoneStore,
) -> Result<SessionOutcome> {
    let mut session = Session::new(
        settings.session,
        SeededRandom::new(args.seed),
        GridLayout::default(),
    );
    let mut clock = VirtualClock::new();
    let mut player = Autoplayer::new(settings.autoplay, args.seed ^ AUTOPLAY_SALT);
    let mut events = Vec::new();

    for command in [
        Command::Resize { width: args.width },
        Command::Start {
            difficulty: settings.session.difficulty,
        },
    ] {
        let mut ports = Ports::new(&mut clock, &mut *milestones);
        session::apply(&mut session, command, &mut ports, &mut events)
            .with_context(|| format!("session rejected {command:?}"))?;
    }

    let mut taps = Vec::new();
    loop {
        let now = clock.now();
        for event in events.drain(..) {
            player.observe(&event, now);
            if !args.quiet {
                println!("{}", describe(&event));
            }
            if let Event::SessionEnded { outcome } = event {
                return Ok(outcome);
            }
        }

        if query::phase(&session) != Phase::Running {
            bail!("session stopped without an outcome");
        }
        if clock.pending() == 0 {
            bail!("running session has no pending timers");
        }

        player.react(now, &mut taps);
        for index in taps.drain(..) {
            let mut ports = Ports::new(&mut clock, &mut *milestones);
            if let Err(error) = session::apply(
                &mut session,
                Command::ActivateCell { index },
                &mut ports,
                &mut events,
            ) {
                debug!(%error, index, "tap rejected");
            }
        }
        if !events.is_empty() {
            continue;
        }

        session::advance(&mut session, &mut clock, milestones, STEP, &mut events);
    }
}

fn describe(event: &Event) -> String {
    match *event {
        Event::SessionStarted {
            difficulty,
            score,
            time_remaining,
            personal_best,
        } => format!(
            "start {difficulty} score={score} time={time_remaining} best={personal_best}"
        ),
        Event::Ticked {
            time_remaining,
            low_time,
            warning,
        } => format!("tick {time_remaining} warn={warning} low={low_time}"),
        Event::CellChanged { index, state } => match state {
            CellState::Empty => format!("cell {index} empty"),
            CellState::Token(kind) => format!("cell {index} {}", token_name(kind)),
        },
        Event::TokenHit { index, kind } => format!("hit {index} {}", token_name(kind)),
        Event::ScoreChanged { score, delta, .. } => format!("score {score} ({delta:+})"),
        Event::SessionEnded { outcome } => format!(
            "end {} score={}/{} accuracy={}% streak={} best={}{}",
            if outcome.is_win { "win" } else { "lose" },
            outcome.score,
            outcome.win_score,
            outcome.accuracy,
            outcome.max_streak,
            outcome.personal_best,
            if outcome.is_new_milestone { " new" } else { "" },
        ),
        Event::GridResized {
            columns,
            rows,
            cell_count,
        } => format!("grid {columns}x{rows} cells={cell_count}"),
        Event::SessionReset {
            difficulty,
            time_remaining,
        } => format!("reset {difficulty} time={time_remaining}"),
        Event::DifficultyChanged {
            difficulty,
            time_limit,
            personal_best,
        } => format!("difficulty {difficulty} time={time_limit} best={personal_best}"),
    }
}

fn token_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Good => "good",
        TokenKind::Bad => "bad",
    }
}

fn summary(outcome: &SessionOutcome, seed: u64) -> String {
    let messages = if outcome.is_win {
        &WIN_MESSAGES
    } else {
        &LOSE_MESSAGES
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let message = messages.choose(&mut rng).copied().unwrap_or_default();
    let mut line = format!(
        "{message} Final score: {}/{} ({}% accuracy)",
        outcome.score, outcome.win_score, outcome.accuracy
    );
    if outcome.is_new_milestone {
        line.push_str(" New personal best!");
    }
    line
}
