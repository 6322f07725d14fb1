//! Inverted Index - value → documents
//!
//! Maps each value of one metric to the documents whose records carry it.
//!
//! # Example
//! ```ignore
//! // Which documents use the GBP currency?
//! let documents = index.find("GBP");
//! // documents = [gb-dfid/dfid-af.xml, gb-dfid/dfid-bd.xml]
//! ```
//!
//! # Design Notes
//! - Nested maps are flattened into "outer:inner" composite values
//! - Documents are kept in scan order and deduplicated per value
//! - In-memory with JSON persistence

use crate::output::{read_json, write_json};
use crate::stats::{DocumentKey, MetricRecord, MetricValue, StatsResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Inverted index of one metric
#[derive(Debug, Clone, PartialEq)]
pub struct InvertedIndex {
    metric: String,
    /// value → documents, in scan order
    entries: BTreeMap<String, Vec<DocumentKey>>,
}

impl InvertedIndex {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Add a document under a value
    ///
    /// Documents arrive in scan order, so a repeat is always the last entry.
    pub fn add(&mut self, value: &str, key: &DocumentKey) {
        let documents = self.entries.entry(value.to_string()).or_default();
        if documents.last() != Some(key) {
            documents.push(key.clone());
        }
    }

    /// Add every value of the record's metric
    pub fn add_record(&mut self, record: &MetricRecord) {
        if let Some(value) = record.get(&self.metric) {
            let key = record.key();
            for v in index_values(value) {
                self.add(&v, &key);
            }
        }
    }

    /// Documents carrying a value
    pub fn find(&self, value: &str) -> &[DocumentKey] {
        self.entries.get(value).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All indexed values
    pub fn values(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Every document appearing under any value
    pub fn documents(&self) -> BTreeSet<DocumentKey> {
        self.entries.values().flatten().cloned().collect()
    }

    pub fn value_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of document entries (with duplicates across values)
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist as `{value: [{publisher, filename}]}`
    pub fn persist(&self, path: &Path) -> StatsResult<()> {
        write_json(path, &self.entries)
    }

    /// Load a persisted index
    pub fn load(metric: impl Into<String>, path: &Path) -> StatsResult<Self> {
        Ok(Self {
            metric: metric.into(),
            entries: read_json(path)?,
        })
    }
}

/// Index values of a metric value
///
/// Map keys flatten to `outer:inner` leaves, set elements and non-empty text
/// index as themselves and a true flag indexes as `"true"`. Plain numbers are
/// not indexed.
pub fn index_values(value: &MetricValue) -> Vec<String> {
    let mut out = Vec::new();
    collect_values(value, None, &mut out);
    out
}

fn collect_values(value: &MetricValue, prefix: Option<&str>, out: &mut Vec<String>) {
    let join = |leaf: &str| match prefix {
        Some(prefix) => format!("{}:{}", prefix, leaf),
        None => leaf.to_string(),
    };

    match value {
        MetricValue::Map(map) => {
            for (key, inner) in map {
                match inner {
                    MetricValue::Map(_) => collect_values(inner, Some(&join(key.as_str())), out),
                    _ => out.push(join(key.as_str())),
                }
            }
        }
        MetricValue::Set(set) => out.extend(set.iter().map(|v| join(v.as_str()))),
        MetricValue::Text(text) if !text.is_empty() => out.push(join(text.as_str())),
        MetricValue::Flag(true) => out.push(join("true")),
        _ => {}
    }
}
