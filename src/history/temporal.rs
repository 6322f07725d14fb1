//! Temporal aggregation
//!
//! Rebuilds dated time series by replaying committed aggregate records; no
//! historical document is ever extracted again.
//!
//! Per scope (global, or one publisher):
//!
//! ```text
//! idle ──▶ scanning: walk commits after the cursor, oldest first
//!              │
//!              ├─ same date as the pending commit ──▶ replace it (keep last)
//!              ├─ later date ──▶ emit the pending date (now closed), start a new one
//!              ├─ earlier date ──▶ skip, that date is closed
//!              └─ malformed record ──▶ stop this scope, cursor stays put
//!              │
//!          emitting: write the open date's snapshot, save the cursor ──▶ idle
//! ```
//!
//! A date is closed once a later-dated commit has been seen and its file is
//! never written again. Only the open date can change on a later run.

use crate::history::{Commit, Cursor, DatedSnapshot, HistoryLog, SnapshotStore, WriteOutcome};
use crate::output::{OutputLayout, CURSOR_FILE};
use crate::stats::{AggregateRecord, Scope, StatsError, StatsResult};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Where historical records live inside each commit, and what to keep
#[derive(Debug, Clone)]
pub struct TemporalOptions {
    /// Directory holding `global.json`
    pub aggregated_dir: String,
    /// Directory holding one `<publisher>.json` per publisher
    pub publisher_dir: String,
    /// Metrics kept in snapshots, all when `None`
    pub metrics: Option<BTreeSet<String>>,
}

impl Default for TemporalOptions {
    fn default() -> Self {
        Self {
            aggregated_dir: "aggregated".to_string(),
            publisher_dir: "aggregated-publisher".to_string(),
            metrics: None,
        }
    }
}

/// Outcome of replaying one scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeOutcome {
    pub commits_scanned: usize,
    pub written: usize,
    pub reused: usize,
    pub removed: usize,
    /// Reason the scope stopped early
    pub blocked: Option<String>,
    /// Cursor to persist
    pub cursor: Cursor,
}

/// Outcome of one temporal run over every scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalSummary {
    pub scopes: usize,
    pub commits_scanned: usize,
    pub written: usize,
    pub reused: usize,
    pub removed: usize,
    /// Scopes stopped by a malformed record, with the reason
    pub blocked: BTreeMap<String, String>,
}

impl TemporalSummary {
    fn absorb(&mut self, scope: &Scope, outcome: &ScopeOutcome) {
        self.scopes += 1;
        self.commits_scanned += outcome.commits_scanned;
        self.written += outcome.written;
        self.reused += outcome.reused;
        self.removed += outcome.removed;
        if let Some(reason) = &outcome.blocked {
            self.blocked.insert(scope.to_string(), reason.clone());
        }
    }
}

/// The latest commit seen for the open date
struct Pending {
    date: NaiveDate,
    commit: String,
    record: Option<AggregateRecord>,
}

/// Replay of one scope
struct ScopeReplay<'a> {
    log: &'a dyn HistoryLog,
    record_path: String,
    scope: Scope,
    store: SnapshotStore,
    whitelist: Option<&'a BTreeSet<String>>,
}

impl ScopeReplay<'_> {
    async fn read(&self, commit: &Commit) -> StatsResult<Option<AggregateRecord>> {
        let bytes = match self.log.read_file(&commit.id, &self.record_path).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StatsError::MalformedHistory {
                commit: commit.id.clone(),
                path: self.record_path.clone(),
                reason: e.to_string(),
            })
    }

    fn emit(&self, pending: Pending, outcome: &mut ScopeOutcome) -> StatsResult<()> {
        match pending.record {
            Some(record) => {
                let snapshot = DatedSnapshot::from_record(
                    pending.date,
                    &pending.commit,
                    self.scope.clone(),
                    record,
                    self.whitelist,
                );
                match self.store.write(&snapshot)? {
                    WriteOutcome::Written => outcome.written += 1,
                    WriteOutcome::Reused => outcome.reused += 1,
                }
            }
            // Absent from the last commit of the date: no snapshot for it
            None => {
                if self.store.remove(pending.date)? {
                    outcome.removed += 1;
                }
            }
        }
        Ok(())
    }

    async fn run(&self, commits: &[Commit], start: usize, resume: Option<&Cursor>) -> StatsResult<ScopeOutcome> {
        let mut outcome = ScopeOutcome::default();
        let mut open_date = resume.and_then(|c| c.date);
        let mut last_commit = resume.and_then(|c| c.commit.clone());
        let mut pending: Option<Pending> = None;

        for commit in commits.iter().skip(start) {
            if open_date.map_or(false, |open| commit.date < open) {
                tracing::debug!(
                    scope = %self.scope,
                    commit = %commit.id,
                    date = %commit.date,
                    "Commit dated before a replayed date, skipping"
                );
                outcome.commits_scanned += 1;
                last_commit = Some(commit.id.clone());
                continue;
            }

            let record = match self.read(commit).await {
                Ok(record) => record,
                Err(e @ StatsError::MalformedHistory { .. }) => {
                    tracing::warn!(scope = %self.scope, error = %e, "Replay blocked");
                    outcome.blocked = Some(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            };

            if open_date.map_or(false, |open| commit.date > open) {
                if let Some(closed) = pending.take() {
                    self.emit(closed, &mut outcome)?;
                }
            }

            open_date = Some(commit.date);
            last_commit = Some(commit.id.clone());
            outcome.commits_scanned += 1;
            pending = Some(Pending {
                date: commit.date,
                commit: commit.id.clone(),
                record,
            });
        }

        if let Some(open) = pending.take() {
            self.emit(open, &mut outcome)?;
        }

        outcome.cursor = Cursor {
            commit: last_commit,
            date: open_date,
        };
        Ok(outcome)
    }
}

/// Replays the history log into dated snapshots
pub struct TemporalAggregator {
    log: Arc<dyn HistoryLog>,
    layout: OutputLayout,
    options: TemporalOptions,
}

impl TemporalAggregator {
    pub fn new(log: Arc<dyn HistoryLog>, layout: OutputLayout, options: TemporalOptions) -> Self {
        Self {
            log,
            layout,
            options,
        }
    }

    fn replay(&self, scope: Scope, record_path: String, store: SnapshotStore) -> ScopeReplay<'_> {
        ScopeReplay {
            log: self.log.as_ref(),
            record_path,
            scope,
            store,
            whitelist: self.options.metrics.as_ref(),
        }
    }

    /// Replay the global aggregate into `gitaggregate/`
    pub async fn run_global(&self) -> StatsResult<TemporalSummary> {
        let commits = self.log.commits().await?;
        let store = SnapshotStore::new(self.layout.gitaggregate_dir());
        let scope = Scope::Global;

        let cursor = Cursor::load(&store.cursor_path())?;
        let (start, resume) = Cursor::resume_point(cursor, &commits, "global");

        tracing::info!(
            commits = commits.len(),
            pending = commits.len().saturating_sub(start),
            "Replaying global history"
        );

        let record_path = format!("{}/global.json", self.options.aggregated_dir.trim_end_matches('/'));
        let replay = self.replay(scope.clone(), record_path, store.clone());
        let outcome = replay.run(&commits, start, resume.as_ref()).await?;
        outcome.cursor.save(&store.cursor_path())?;

        let views = store.series()?.write_views(&store.series_dir())?;
        tracing::debug!(metrics = views, "Rebuilt series views");

        let mut summary = TemporalSummary::default();
        summary.absorb(&scope, &outcome);
        log_summary("global", &summary);
        Ok(summary)
    }

    /// Replay every publisher's aggregate into `gitaggregate-publisher/<publisher>/`
    pub async fn run_publishers(&self) -> StatsResult<TemporalSummary> {
        let commits = self.log.commits().await?;
        let root = self.layout.gitaggregate_publisher_root();
        let discovery_path = root.join(CURSOR_FILE);
        let publisher_dir = self.options.publisher_dir.trim_end_matches('/').to_string();

        // Publishers replayed on an earlier run
        let mut plans: BTreeMap<String, (usize, Option<Cursor>)> = BTreeMap::new();
        if root.exists() {
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let publisher = entry.file_name().to_string_lossy().to_string();
                let cursor = Cursor::load(&entry.path().join(CURSOR_FILE))?;
                if cursor.is_some() {
                    plans.insert(
                        publisher.clone(),
                        Cursor::resume_point(cursor, &commits, &publisher),
                    );
                }
            }
        }

        // Publishers first appearing in commits not yet scanned start there
        let discovery = Cursor::load(&discovery_path)?;
        let (scan_from, _) = Cursor::resume_point(discovery, &commits, "publisher discovery");
        for (index, commit) in commits.iter().enumerate().skip(scan_from) {
            for name in self.log.list_dir(&commit.id, &publisher_dir).await? {
                let publisher = match name.strip_suffix(".json") {
                    Some(p) if !p.is_empty() && !p.starts_with('.') => p,
                    _ => continue,
                };
                plans
                    .entry(publisher.to_string())
                    .or_insert((index, None));
            }
        }

        tracing::info!(
            commits = commits.len(),
            publishers = plans.len(),
            "Replaying publisher history"
        );

        let mut summary = TemporalSummary::default();
        for (publisher, (start, resume)) in &plans {
            let scope = Scope::Publisher(publisher.clone());
            let store = SnapshotStore::new(self.layout.gitaggregate_publisher_dir(publisher));
            let record_path = format!("{}/{}.json", publisher_dir, publisher);

            let replay = self.replay(scope.clone(), record_path, store.clone());
            let outcome = replay.run(&commits, *start, resume.as_ref()).await?;
            outcome.cursor.save(&store.cursor_path())?;
            summary.absorb(&scope, &outcome);
        }

        if let Some(last) = commits.last() {
            Cursor::at(last).save(&discovery_path)?;
        }

        log_summary("publisher", &summary);
        Ok(summary)
    }
}

fn log_summary(variant: &str, summary: &TemporalSummary) {
    tracing::info!(
        variant,
        scopes = summary.scopes,
        commits = summary.commits_scanned,
        written = summary.written,
        reused = summary.reused,
        removed = summary.removed,
        blocked = summary.blocked.len(),
        "Temporal aggregation complete"
    );
    for (scope, reason) in &summary.blocked {
        tracing::warn!(scope = %scope, reason = %reason, "Scope blocked on malformed history");
    }
}
