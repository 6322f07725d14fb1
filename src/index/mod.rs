//! Inverted indices over extracted records
//!
//! One [`InvertedIndex`] per configured metric, answering "which documents
//! carry this value":
//!
//! ```text
//! loop/<pub>/*.json ──scan (publisher, filename)──▶ invert/<metric>.json
//!                                                    { value: [{publisher, filename}, ...] }
//! ```

mod inverted;

pub use inverted::{index_values, InvertedIndex};

use crate::aggregate::RecordSet;
use crate::output::OutputLayout;
use crate::stats::StatsResult;

/// Metrics inverted when none are configured
pub const DEFAULT_INVERT_METRICS: &[&str] = &[
    "iati_identifiers",
    "reporting_orgs",
    "participating_orgs",
    "codelist_values",
    "currencies",
    "provider_activity_id",
];

/// Statistics about one invert run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvertSummary {
    /// Number of indices written
    pub indices: usize,
    /// Number of records scanned
    pub records: usize,
    /// Distinct values across all indices
    pub values: usize,
}

/// Builds inverted indices for a fixed list of metrics
#[derive(Debug, Clone)]
pub struct Inverter {
    metrics: Vec<String>,
}

impl Default for Inverter {
    fn default() -> Self {
        Self::new(DEFAULT_INVERT_METRICS.iter().map(|m| m.to_string()).collect())
    }
}

impl Inverter {
    pub fn new(metrics: Vec<String>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Build every index in one pass over the record set
    pub fn build(&self, set: &RecordSet) -> Vec<InvertedIndex> {
        let mut indices: Vec<InvertedIndex> =
            self.metrics.iter().map(InvertedIndex::new).collect();

        for record in set.iter() {
            for index in indices.iter_mut() {
                index.add_record(record);
            }
        }
        indices
    }

    /// Run the invert stage against an output directory
    pub fn run(&self, layout: &OutputLayout) -> StatsResult<InvertSummary> {
        let set = RecordSet::load(layout)?;
        tracing::info!(
            metrics = self.metrics.len(),
            records = set.record_count(),
            "Starting inversion"
        );
        let indices = self.build(&set);

        let invert_dir = layout.invert_dir();
        if invert_dir.exists() {
            std::fs::remove_dir_all(&invert_dir)?;
        }
        std::fs::create_dir_all(&invert_dir)?;

        for index in &indices {
            index.persist(&layout.invert_path(index.metric()))?;
            tracing::debug!(
                metric = %index.metric(),
                values = index.value_count(),
                entries = index.entry_count(),
                "Wrote inverted index"
            );
        }

        let summary = InvertSummary {
            indices: indices.len(),
            records: set.record_count(),
            values: indices.iter().map(InvertedIndex::value_count).sum(),
        };
        tracing::info!(
            indices = summary.indices,
            records = summary.records,
            values = summary.values,
            "Inversion complete"
        );
        Ok(summary)
    }
}
