//! Core data types for the statistics pipeline
//!
//! This module defines the fundamental types shared by every stage:
//! - `MetricValue`: A typed metric value (count, amount, set, flag, nested map)
//! - `DocumentKey`: Identity of one source document
//! - `MetricRecord`: Per-document extracted metrics
//! - `AggregateRecord`: Metrics combined at publisher or global scope

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single metric value
///
/// Serialized untagged so records read naturally as JSON. Maps and sets are
/// ordered so output is byte-for-byte reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Boolean flag (combined with boolean-or)
    Flag(bool),
    /// Integer count
    Count(i64),
    /// Decimal amount (currency sums)
    Amount(f64),
    /// Free text, usually an ISO date
    Text(String),
    /// Set of distinct strings
    Set(BTreeSet<String>),
    /// Nested mapping of values
    Map(BTreeMap<String, MetricValue>),
}

impl MetricValue {
    /// An empty nested mapping
    pub fn empty_map() -> Self {
        MetricValue::Map(BTreeMap::new())
    }

    /// Build a count mapping from `(key, count)` pairs, summing duplicates
    pub fn counts<K: Into<String>>(pairs: impl IntoIterator<Item = (K, i64)>) -> Self {
        let mut out: BTreeMap<String, MetricValue> = BTreeMap::new();
        for (key, n) in pairs {
            let entry = out.entry(key.into()).or_insert(MetricValue::Count(0));
            if let MetricValue::Count(c) = entry {
                *c += n;
            }
        }
        MetricValue::Map(out)
    }

    /// Numeric view of a count or amount
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Count(n) => Some(*n as f64),
            MetricValue::Amount(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of a count
    pub fn as_count(&self) -> Option<i64> {
        match self {
            MetricValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetricValue>> {
        match self {
            MetricValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value carries nothing (empty map, set or text)
    pub fn is_empty(&self) -> bool {
        match self {
            MetricValue::Map(m) => m.is_empty(),
            MetricValue::Set(s) => s.is_empty(),
            MetricValue::Text(t) => t.is_empty(),
            _ => false,
        }
    }

    /// Short name of the variant, used in log messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            MetricValue::Flag(_) => "flag",
            MetricValue::Count(_) => "count",
            MetricValue::Amount(_) => "amount",
            MetricValue::Text(_) => "text",
            MetricValue::Set(_) => "set",
            MetricValue::Map(_) => "map",
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Flag(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Count(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Amount(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<BTreeSet<String>> for MetricValue {
    fn from(v: BTreeSet<String>) -> Self {
        MetricValue::Set(v)
    }
}

impl<V: Into<MetricValue>> From<BTreeMap<String, V>> for MetricValue {
    fn from(v: BTreeMap<String, V>) -> Self {
        MetricValue::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Identity of one source document: the publisher directory and file name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub publisher: String,
    pub filename: String,
}

impl DocumentKey {
    pub fn new(publisher: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            publisher: publisher.into(),
            filename: filename.into(),
        }
    }

    /// Name of the per-document output file (`foo.xml` → `foo.xml.json`)
    ///
    /// The full filename is kept so `doc` and `doc.xml` never share a record.
    pub fn record_name(&self) -> String {
        format!("{}.json", self.filename)
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.publisher, self.filename)
    }
}

/// Kind of source document, decided by its XML root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// `iati-activities` root
    Activity,
    /// `iati-organisations` root
    Organisation,
}

impl DocumentKind {
    /// Resolve a document kind from its root element name
    pub fn from_root(root: &str) -> Option<Self> {
        match root {
            "iati-activities" => Some(DocumentKind::Activity),
            "iati-organisations" => Some(DocumentKind::Organisation),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Activity => write!(f, "activity"),
            DocumentKind::Organisation => write!(f, "organisation"),
        }
    }
}

/// Metrics extracted from one document
///
/// Created by the extractor, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub publisher: String,
    pub filename: String,
    pub kind: DocumentKind,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl MetricRecord {
    pub fn new(key: &DocumentKey, kind: DocumentKind) -> Self {
        Self {
            publisher: key.publisher.clone(),
            filename: key.filename.clone(),
            kind,
            metrics: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.publisher.clone(), self.filename.clone())
    }

    /// Builder-style insert
    pub fn set(&mut self, name: &str, value: impl Into<MetricValue>) {
        self.metrics.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }
}

/// Scope of an aggregate record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "lowercase")]
pub enum Scope {
    Publisher(String),
    Global,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Publisher(id) => write!(f, "publisher:{}", id),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// Metrics combined over every record in a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub scope: Scope,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl AggregateRecord {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            metrics: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<MetricValue>) {
        self.metrics.insert(name.to_string(), value.into());
    }

    /// Count stored under `name`, zero when absent
    pub fn count(&self, name: &str) -> i64 {
        self.get(name).and_then(MetricValue::as_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_roundtrip_keeps_variants() {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), MetricValue::Count(3));
        map.insert("amount".to_string(), MetricValue::Amount(2.0));
        map.insert("flag".to_string(), MetricValue::Flag(true));
        map.insert("date".to_string(), MetricValue::from("2024-01-01"));
        map.insert(
            "langs".to_string(),
            MetricValue::Set(["en".to_string(), "fr".to_string()].into_iter().collect()),
        );
        let value = MetricValue::Map(map);

        let json = serde_json::to_string(&value).unwrap();
        let back: MetricValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_counts_sums_duplicates() {
        let value = MetricValue::counts([("a", 1), ("b", 2), ("a", 3)]);
        let map = value.as_map().unwrap();
        assert_eq!(map["a"], MetricValue::Count(4));
        assert_eq!(map["b"], MetricValue::Count(2));
    }

    #[test]
    fn test_document_key_ordering() {
        let mut keys = vec![
            DocumentKey::new("b", "a.xml"),
            DocumentKey::new("a", "z.xml"),
            DocumentKey::new("a", "b.xml"),
        ];
        keys.sort();
        assert_eq!(keys[0].to_string(), "a/b.xml");
        assert_eq!(keys[1].to_string(), "a/z.xml");
        assert_eq!(keys[2].to_string(), "b/a.xml");
        assert_eq!(keys[0].record_name(), "b.xml.json");
    }

    #[test]
    fn test_scope_serialization() {
        let json = serde_json::to_string(&Scope::Publisher("dfid".into())).unwrap();
        assert_eq!(json, r#"{"level":"publisher","id":"dfid"}"#);
        let json = serde_json::to_string(&Scope::Global).unwrap();
        assert_eq!(json, r#"{"level":"global"}"#);
        let back: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Scope::Global);
    }

    #[test]
    fn test_document_kind_from_root() {
        assert_eq!(
            DocumentKind::from_root("iati-activities"),
            Some(DocumentKind::Activity)
        );
        assert_eq!(
            DocumentKind::from_root("iati-organisations"),
            Some(DocumentKind::Organisation)
        );
        assert_eq!(DocumentKind::from_root("html"), None);
    }
}
