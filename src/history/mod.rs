//! Output History
//!
//! The version-control history of the output directory is the only source
//! of historical aggregates. This module provides:
//! - `HistoryLog`: ordered commits and the file tree as of each commit
//! - `GitHistoryLog`: a git repository read through the `git` binary
//! - `MemoryHistoryLog`: an in-memory log for tests and dry runs
//! - `TemporalAggregator`: replays commits into dated snapshots

mod cursor;
mod git;
mod memory;
mod snapshot;
mod temporal;

pub use cursor::Cursor;
pub use git::GitHistoryLog;
pub use memory::MemoryHistoryLog;
pub use snapshot::{DatedSnapshot, SnapshotStore, TimeSeries, WriteOutcome};
pub use temporal::{ScopeOutcome, TemporalAggregator, TemporalOptions, TemporalSummary};

use crate::stats::StatsResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One commit of the output history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit identifier (a git hash for `GitHistoryLog`)
    pub id: String,
    /// Calendar date of the commit, in the committer's timezone
    pub date: NaiveDate,
}

impl Commit {
    pub fn new(id: impl Into<String>, date: NaiveDate) -> Self {
        Self { id: id.into(), date }
    }
}

/// Read access to an ordered log of output commits
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Every commit, oldest first
    async fn commits(&self) -> StatsResult<Vec<Commit>>;

    /// Content of a file as of a commit, `None` when it did not exist
    async fn read_file(&self, commit: &str, path: &str) -> StatsResult<Option<Vec<u8>>>;

    /// Names of the files directly inside a directory as of a commit
    ///
    /// Empty when the directory did not exist.
    async fn list_dir(&self, commit: &str, path: &str) -> StatsResult<Vec<String>>;
}
