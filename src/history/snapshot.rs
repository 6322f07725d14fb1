//! Dated snapshots and the time series they form
//!
//! A scope's snapshots live in one directory, one `<YYYY-MM-DD>.json` file
//! per date, so listing the directory in name order yields the series.

use crate::output::{read_json, to_json_bytes, write_bytes, write_json, CURSOR_FILE};
use crate::stats::{AggregateRecord, MetricValue, Scope, StatsResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// An aggregate record tagged with the date it describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedSnapshot {
    pub date: NaiveDate,
    /// Commit the record was read from (the last commit of that date)
    pub commit: String,
    pub scope: Scope,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl DatedSnapshot {
    /// Snapshot of a historical record, keeping only whitelisted metrics
    pub fn from_record(
        date: NaiveDate,
        commit: &str,
        scope: Scope,
        record: AggregateRecord,
        whitelist: Option<&BTreeSet<String>>,
    ) -> Self {
        let metrics = match whitelist {
            Some(names) => record
                .metrics
                .into_iter()
                .filter(|(name, _)| names.contains(name))
                .collect(),
            None => record.metrics,
        };

        Self {
            date,
            commit: commit.to_string(),
            scope,
            metrics,
        }
    }
}

/// Result of writing a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// An identical file was already there
    Reused,
}

/// Snapshot directory of one scope
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.dir.join(CURSOR_FILE)
    }

    /// Per-metric views of the series
    pub fn series_dir(&self) -> PathBuf {
        self.dir.join("series")
    }

    /// Write a snapshot unless an identical file already exists
    pub fn write(&self, snapshot: &DatedSnapshot) -> StatsResult<WriteOutcome> {
        let path = self.path(snapshot.date);
        let content = to_json_bytes(snapshot)?;

        if let Ok(existing) = std::fs::read(&path) {
            if existing == content {
                return Ok(WriteOutcome::Reused);
            }
        }

        write_bytes(&path, &content)?;
        Ok(WriteOutcome::Written)
    }

    /// Remove the snapshot of a date, returning whether one existed
    pub fn remove(&self, date: NaiveDate) -> StatsResult<bool> {
        let path = self.path(date);
        if path.exists() {
            std::fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn load(&self, date: NaiveDate) -> StatsResult<DatedSnapshot> {
        read_json(&self.path(date))
    }

    /// Dates with a snapshot, oldest first
    pub fn dates(&self) -> StatsResult<Vec<NaiveDate>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Load every snapshot in date order
    pub fn series(&self) -> StatsResult<TimeSeries> {
        let points = self
            .dates()?
            .into_iter()
            .map(|date| self.load(date))
            .collect::<StatsResult<Vec<_>>>()?;
        Ok(TimeSeries { points })
    }
}

/// All snapshots of a scope, ordered by date
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub points: Vec<DatedSnapshot>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Every metric name appearing in any snapshot
    pub fn metric_names(&self) -> BTreeSet<String> {
        self.points
            .iter()
            .flat_map(|p| p.metrics.keys().cloned())
            .collect()
    }

    /// date → value of one metric, for the dates that have it
    pub fn values(&self, metric: &str) -> BTreeMap<String, MetricValue> {
        self.points
            .iter()
            .filter_map(|p| {
                p.metrics
                    .get(metric)
                    .map(|v| (p.date.format("%Y-%m-%d").to_string(), v.clone()))
            })
            .collect()
    }

    /// Rewrite the per-metric views under `dir`
    pub fn write_views(&self, dir: &Path) -> StatsResult<usize> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;

        let names = self.metric_names();
        for name in &names {
            write_json(&dir.join(format!("{}.json", name)), &self.values(name))?;
        }
        Ok(names.len())
    }
}
