//! Output directory layout
//!
//! Every stage reads and writes files under one output directory:
//!
//! ```text
//! <output>/
//!   loop/<publisher>/<file>.json          per-document MetricRecords
//!   loop/_manifest.json                   written last by a completed loop run
//!   aggregated/global.json                global AggregateRecord
//!   aggregated-publisher/<publisher>.json publisher AggregateRecords
//!   invert/<metric>.json                  inverted indices
//!   gitaggregate/<date>.json              global time series
//!   gitaggregate-publisher/<publisher>/<date>.json
//! ```
//!
//! JSON is written to a temporary sibling and renamed into place so a reader
//! never sees a half-written file.

use crate::stats::{DocumentKey, StatsError, StatsResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "_manifest.json";
pub const CURSOR_FILE: &str = "_cursor.json";

/// Paths of every stage's output
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of per-document MetricRecords
    pub fn loop_dir(&self) -> PathBuf {
        self.root.join("loop")
    }

    /// Output path of one document's MetricRecord
    pub fn record_path(&self, key: &DocumentKey) -> PathBuf {
        self.loop_dir()
            .join(&key.publisher)
            .join(key.record_name())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.loop_dir().join(MANIFEST_FILE)
    }

    pub fn aggregated_dir(&self) -> PathBuf {
        self.root.join("aggregated")
    }

    pub fn global_aggregate_path(&self) -> PathBuf {
        self.aggregated_dir().join("global.json")
    }

    pub fn publisher_aggregate_dir(&self) -> PathBuf {
        self.root.join("aggregated-publisher")
    }

    pub fn publisher_aggregate_path(&self, publisher: &str) -> PathBuf {
        self.publisher_aggregate_dir()
            .join(format!("{}.json", publisher))
    }

    pub fn invert_dir(&self) -> PathBuf {
        self.root.join("invert")
    }

    pub fn invert_path(&self, metric: &str) -> PathBuf {
        self.invert_dir().join(format!("{}.json", metric))
    }

    /// Snapshot directory of the global time series
    pub fn gitaggregate_dir(&self) -> PathBuf {
        self.root.join("gitaggregate")
    }

    /// Root of every publisher's time series
    pub fn gitaggregate_publisher_root(&self) -> PathBuf {
        self.root.join("gitaggregate-publisher")
    }

    /// Snapshot directory of one publisher's time series
    pub fn gitaggregate_publisher_dir(&self, publisher: &str) -> PathBuf {
        self.gitaggregate_publisher_root().join(publisher)
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StatsResult<()> {
    let content = to_json_bytes(value)?;
    write_bytes(path, &content)
}

/// Pretty JSON with a trailing newline, the on-disk encoding of every output
pub fn to_json_bytes<T: Serialize>(value: &T) -> StatsResult<Vec<u8>> {
    let mut content = serde_json::to_vec_pretty(value)?;
    content.push(b'\n');
    Ok(content)
}

/// Atomically replace `path` with `content`
pub fn write_bytes(path: &Path, content: &[u8]) -> StatsResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and parse a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StatsResult<T> {
    let content = std::fs::read(path)?;
    serde_json::from_slice(&content).map_err(|e| {
        StatsError::Serialization(format!("Failed to parse {:?}: {}", path, e))
    })
}

/// Outcome of one document in a completed loop run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublisherManifest {
    /// Successfully extracted filenames → CRC32 of the written record
    #[serde(default)]
    pub extracted: BTreeMap<String, u32>,
    /// Failed filenames → failure reason
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

/// Record of a completed extraction run
///
/// Written last, so its presence marks every listed output as trustworthy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopManifest {
    pub run_id: String,
    pub completed_at: DateTime<Utc>,
    pub publishers: BTreeMap<String, PublisherManifest>,
}

impl LoopManifest {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            completed_at: Utc::now(),
            publishers: BTreeMap::new(),
        }
    }

    /// Load the manifest of the last completed run
    pub fn load(layout: &OutputLayout) -> StatsResult<Self> {
        let path = layout.manifest_path();
        if !path.exists() {
            return Err(StatsError::IncompleteRun(format!(
                "no completed loop run in {:?}; run `loop` first",
                layout.loop_dir()
            )));
        }
        read_json(&path)
    }

    pub fn record_success(&mut self, key: &DocumentKey, checksum: u32) {
        self.publishers
            .entry(key.publisher.clone())
            .or_default()
            .extracted
            .insert(key.filename.clone(), checksum);
    }

    pub fn record_failure(&mut self, key: &DocumentKey, reason: impl Into<String>) {
        self.publishers
            .entry(key.publisher.clone())
            .or_default()
            .failed
            .insert(key.filename.clone(), reason.into());
    }

    pub fn extracted_count(&self) -> usize {
        self.publishers.values().map(|p| p.extracted.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.publishers.values().map(|p| p.failed.len()).sum()
    }
}
