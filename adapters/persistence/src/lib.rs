#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Milestone stores that persist the best score reached per difficulty.
//!
//! [`TomlMilestones`] keeps one integer per difficulty name in a small TOML
//! document:
//!
//! ```toml
//! easy = 31
//! hard = 12
//! ```
//!
//! Missing files and missing keys read as zero. Keys that do not name a known
//! difficulty are preserved on write.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;
use water_rush_core::{Difficulty, MilestoneStore, StoreError};

/// Errors raised while loading or saving a milestone file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The file could not be read or written.
    #[error("milestone file {path} could not be accessed")]
    Io {
        /// Location of the milestone file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The file contents are not a table of non-negative integers.
    #[error("milestone file {path} is malformed")]
    Parse {
        /// Location of the milestone file.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: toml::de::Error,
    },
    /// The records could not be encoded.
    #[error("milestone records could not be encoded")]
    Encode(#[from] toml::ser::Error),
}

/// Volatile store used by tests and hosts without durable storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryMilestones {
    records: BTreeMap<Difficulty, u32>,
}

impl MemoryMilestones {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store with `score` recorded for `difficulty`.
    #[must_use]
    pub fn with_best(mut self, difficulty: Difficulty, score: u32) -> Self {
        let _ = self.records.insert(difficulty, score);
        self
    }
}

impl MilestoneStore for MemoryMilestones {
    fn best(&self, difficulty: Difficulty) -> Result<u32, StoreError> {
        Ok(self.records.get(&difficulty).copied().unwrap_or(0))
    }

    fn set_best(&mut self, difficulty: Difficulty, score: u32) -> Result<(), StoreError> {
        let _ = self.records.insert(difficulty, score);
        Ok(())
    }
}

/// File-backed store that rewrites its TOML document on every update.
#[derive(Clone, Debug)]
pub struct TomlMilestones {
    path: PathBuf,
    records: BTreeMap<String, u32>,
}

impl TomlMilestones {
    /// Loads the milestone file at `path`, treating a missing file as empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(|source| {
                PersistenceError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };

        debug!(path = %path.display(), entries = records.len(), "milestones loaded");
        Ok(Self { path, records })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), PersistenceError> {
        let contents = toml::to_string(&self.records)?;
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, contents).map_err(|source| PersistenceError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &self.path).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl MilestoneStore for TomlMilestones {
    fn best(&self, difficulty: Difficulty) -> Result<u32, StoreError> {
        Ok(self.records.get(difficulty.name()).copied().unwrap_or(0))
    }

    fn set_best(&mut self, difficulty: Difficulty, score: u32) -> Result<(), StoreError> {
        let previous = self.records.insert(difficulty.name().to_owned(), score);
        if let Err(error) = self.save() {
            match previous {
                Some(value) => {
                    let _ = self.records.insert(difficulty.name().to_owned(), value);
                }
                None => {
                    let _ = self.records.remove(difficulty.name());
                }
            }
            return Err(StoreError::Write {
                difficulty,
                reason: error_chain(&error),
            });
        }
        Ok(())
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
