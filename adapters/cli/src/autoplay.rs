use std::{collections::BTreeMap, time::Duration};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use water_rush_core::{CellState, Event, TokenKind};

use crate::config::AutoplayConfig;

#[derive(Clone, Copy, Debug)]
struct Sighting {
    kind: TokenKind,
    seen_at: Duration,
}

/// Simulated player that taps tokens after a fixed reaction time.
#[derive(Debug)]
pub(crate) struct Autoplayer {
    config: AutoplayConfig,
    rng: ChaCha8Rng,
    sightings: BTreeMap<usize, Sighting>,
}

impl Autoplayer {
    pub(crate) fn new(config: AutoplayConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            sightings: BTreeMap::new(),
        }
    }

    /// Tracks which tokens are visible and when they appeared.
    pub(crate) fn observe(&mut self, event: &Event, now: Duration) {
        match *event {
            Event::CellChanged {
                index,
                state: CellState::Token(kind),
            } => {
                let _ = self.sightings.insert(index, Sighting { kind, seen_at: now });
            }
            Event::CellChanged {
                index,
                state: CellState::Empty,
            }
            | Event::TokenHit { index, .. } => {
                let _ = self.sightings.remove(&index);
            }
            Event::GridResized { .. } | Event::SessionReset { .. } | Event::SessionEnded { .. } => {
                self.sightings.clear();
            }
            _ => {}
        }
    }

    /// Decides on every token the player has had time to react to, pushing
    /// the cells to tap into `taps`. Each token is considered once.
    pub(crate) fn react(&mut self, now: Duration, taps: &mut Vec<usize>) {
        let reaction = self.config.reaction;
        let due: Vec<(usize, TokenKind)> = self
            .sightings
            .iter()
            .filter(|(_, sighting)| now.saturating_sub(sighting.seen_at) >= reaction)
            .map(|(&index, sighting)| (index, sighting.kind))
            .collect();

        for (index, kind) in due {
            let _ = self.sightings.remove(&index);
            if kind == TokenKind::Bad && self.config.avoid_bad {
                continue;
            }
            if self.rng.gen_bool(self.config.hit_chance) {
                taps.push(index);
            }
        }
    }
}
