//! Replay cursor
//!
//! Persisted per scope as `_cursor.json` so a rerun resumes instead of
//! restarting.

use crate::history::Commit;
use crate::output::{read_json, write_json};
use crate::stats::StatsResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Position of a scope in the history log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last fully processed commit, `None` before the first one
    pub commit: Option<String>,
    /// Date of the newest replayed commit: the open date
    pub date: Option<NaiveDate>,
}

impl Cursor {
    pub fn at(commit: &Commit) -> Self {
        Self {
            commit: Some(commit.id.clone()),
            date: Some(commit.date),
        }
    }

    /// Load a cursor, `None` when it was never written
    pub fn load(path: &Path) -> StatsResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        read_json(path).map(Some)
    }

    pub fn save(&self, path: &Path) -> StatsResult<()> {
        write_json(path, self)
    }

    /// Index of the first commit still to replay, with the cursor to resume
    /// from
    ///
    /// A cursor whose commit is no longer in the history falls back to a
    /// full replay.
    pub fn resume_point(cursor: Option<Self>, commits: &[Commit], scope: &str) -> (usize, Option<Self>) {
        let cursor = match cursor {
            Some(cursor) => cursor,
            None => return (0, None),
        };

        let id = match &cursor.commit {
            Some(id) => id,
            None => return (0, Some(cursor)),
        };

        match commits.iter().position(|c| &c.id == id) {
            Some(pos) => (pos + 1, Some(cursor)),
            None => {
                tracing::warn!(
                    scope = %scope,
                    commit = %id,
                    "Cursor commit not found in history, replaying from the start"
                );
                (0, None)
            }
        }
    }
}
