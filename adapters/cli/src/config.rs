use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use water_rush_core::{Difficulty, ScoringMode, SessionConfig};

/// Behaviour of the simulated player.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct AutoplayConfig {
    /// Probability of tapping a token once it has been noticed.
    pub(crate) hit_chance: f64,
    /// Time between a token appearing and the player reacting to it.
    pub(crate) reaction: Duration,
    /// Whether bad tokens are left alone.
    pub(crate) avoid_bad: bool,
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Self {
            hit_chance: 0.85,
            reaction: Duration::from_millis(350),
            avoid_bad: true,
        }
    }
}

/// Fully resolved settings for one run of the binary.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Settings {
    pub(crate) session: SessionConfig,
    pub(crate) autoplay: AutoplayConfig,
}

/// Values supplied on the command line, which win over the file.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Overrides {
    pub(crate) difficulty: Option<Difficulty>,
    pub(crate) scoring: Option<ScoringMode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    session: SessionSection,
    autoplay: AutoplaySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SessionSection {
    difficulty: Option<Difficulty>,
    scoring: Option<ScoringMode>,
    multi_spawn: Option<bool>,
    warm_up_ms: Option<u64>,
    clear_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AutoplaySection {
    hit_chance: Option<f64>,
    reaction_ms: Option<u64>,
    avoid_bad: Option<bool>,
}

/// Reads the optional configuration file and layers `overrides` on top.
pub(crate) fn load(path: Option<&Path>, overrides: Overrides) -> Result<Settings> {
    let file = match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            parse(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        }
        None => FileConfig::default(),
    };
    resolve(file, overrides)
}

fn parse(contents: &str) -> Result<FileConfig> {
    toml::from_str(contents).context("invalid config toml contents")
}

fn resolve(file: FileConfig, overrides: Overrides) -> Result<Settings> {
    let mut settings = Settings::default();

    let session = &mut settings.session;
    if let Some(difficulty) = overrides.difficulty.or(file.session.difficulty) {
        session.difficulty = difficulty;
    }
    if let Some(scoring) = overrides.scoring.or(file.session.scoring) {
        session.scoring = scoring;
    }
    if let Some(multi_spawn) = file.session.multi_spawn {
        session.multi_spawn = multi_spawn;
    }
    if let Some(warm_up) = file.session.warm_up_ms {
        session.warm_up = Duration::from_millis(warm_up);
    }
    if let Some(clear_delay) = file.session.clear_delay_ms {
        session.clear_delay = Duration::from_millis(clear_delay);
    }

    let autoplay = &mut settings.autoplay;
    if let Some(hit_chance) = file.autoplay.hit_chance {
        if !(0.0..=1.0).contains(&hit_chance) {
            bail!("autoplay.hit_chance must lie within 0.0..=1.0, got {hit_chance}");
        }
        autoplay.hit_chance = hit_chance;
    }
    if let Some(reaction) = file.autoplay.reaction_ms {
        autoplay.reaction = Duration::from_millis(reaction);
    }
    if let Some(avoid_bad) = file.autoplay.avoid_bad {
        autoplay.avoid_bad = avoid_bad;
    }

    Ok(settings)
}
