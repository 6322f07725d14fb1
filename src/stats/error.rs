//! Pipeline error types
//!
//! Defines all errors that can occur while extracting, aggregating,
//! inverting and replaying statistics.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur anywhere in the statistics pipeline
#[derive(Error, Debug)]
pub enum StatsError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Source document is not well-formed XML
    #[error("Malformed document: {0}")]
    Xml(String),

    /// Source document is not valid UTF-8
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Source document root is neither an activity nor an organisation report
    #[error("Unsupported document kind: {0}")]
    UnsupportedDocument(String),

    /// Reference data (codelists, mappings, exchange rates) missing or unreadable
    #[error("Reference data error in {path:?}: {reason}")]
    ReferenceData { path: PathBuf, reason: String },

    /// A historical aggregate could not be parsed
    #[error("Malformed history at commit {commit} ({path}): {reason}")]
    MalformedHistory {
        commit: String,
        path: String,
        reason: String,
    },

    /// The version-control backend failed
    #[error("History log error: {0}")]
    History(String),

    /// A per-document output does not match its recorded checksum
    #[error("Corrupt output: {0}")]
    Corruption(String),

    /// No completed extraction run is available to aggregate
    #[error("Incomplete run: {0}")]
    IncompleteRun(String),

    /// Too many documents failed extraction
    #[error("{failed} documents failed extraction (threshold {threshold})")]
    FailureThreshold { failed: usize, threshold: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StatsError {
    /// Whether this failure is contained to a single source document
    pub fn is_document_local(&self) -> bool {
        matches!(
            self,
            StatsError::Xml(_) | StatsError::Encoding(_) | StatsError::UnsupportedDocument(_)
        )
    }
}

impl From<serde_json::Error> for StatsError {
    fn from(err: serde_json::Error) -> Self {
        StatsError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for StatsError {
    fn from(err: csv::Error) -> Self {
        StatsError::Serialization(err.to_string())
    }
}

impl From<quick_xml::Error> for StatsError {
    fn from(err: quick_xml::Error) -> Self {
        StatsError::Xml(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type StatsResult<T> = Result<T, StatsError>;
