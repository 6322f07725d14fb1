//! Reading the per-document outputs of the last completed loop run

use crate::output::{LoopManifest, OutputLayout, PublisherManifest};
use crate::stats::{DocumentKey, MetricRecord, StatsError, StatsResult};
use std::collections::BTreeMap;

/// Records of one publisher
#[derive(Debug, Clone, Default)]
pub struct PublisherRecords {
    /// Records sorted by filename
    pub records: Vec<MetricRecord>,
    /// Documents that failed extraction or whose output could not be trusted
    pub not_aggregated: i64,
}

/// Every trustworthy MetricRecord of a completed loop run, by publisher
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub publishers: BTreeMap<String, PublisherRecords>,
}

impl RecordSet {
    /// Load every record listed in the manifest
    ///
    /// Outputs that are missing, fail their checksum or do not parse are left
    /// out with a warning and counted as not aggregated.
    pub fn load(layout: &OutputLayout) -> StatsResult<Self> {
        let manifest = LoopManifest::load(layout)?;
        tracing::debug!(run_id = %manifest.run_id, "Loading records");

        let mut set = RecordSet::default();
        for (publisher, entry) in &manifest.publishers {
            let records = load_publisher(layout, publisher, entry)?;
            set.publishers.insert(publisher.clone(), records);
        }
        Ok(set)
    }

    /// All records in (publisher, filename) order
    pub fn iter(&self) -> impl Iterator<Item = &MetricRecord> {
        self.publishers.values().flat_map(|p| p.records.iter())
    }

    pub fn record_count(&self) -> usize {
        self.publishers.values().map(|p| p.records.len()).sum()
    }
}

fn load_publisher(
    layout: &OutputLayout,
    publisher: &str,
    entry: &PublisherManifest,
) -> StatsResult<PublisherRecords> {
    let mut out = PublisherRecords {
        records: Vec::with_capacity(entry.extracted.len()),
        not_aggregated: entry.failed.len() as i64,
    };

    for (filename, checksum) in &entry.extracted {
        let key = DocumentKey::new(publisher, filename.clone());
        match read_record(layout, &key, *checksum) {
            Ok(record) => out.records.push(record),
            Err(e @ (StatsError::Corruption(_) | StatsError::Serialization(_))) => {
                tracing::warn!(document = %key, error = %e, "Skipping untrusted output");
                out.not_aggregated += 1;
            }
            Err(StatsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(document = %key, "Output listed in manifest is missing");
                out.not_aggregated += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(out)
}

fn read_record(layout: &OutputLayout, key: &DocumentKey, checksum: u32) -> StatsResult<MetricRecord> {
    let path = layout.record_path(key);
    let bytes = std::fs::read(&path)?;

    let actual = crc32fast::hash(&bytes);
    if actual != checksum {
        return Err(StatsError::Corruption(format!(
            "{:?}: checksum {:08x}, manifest says {:08x}",
            path, actual, checksum
        )));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| StatsError::Serialization(format!("Failed to parse {:?}: {}", path, e)))
}
