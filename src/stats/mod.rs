//! Statistics Data Model
//!
//! This module provides the types every pipeline stage shares:
//!
//! - **types**: Metric values and records (MetricRecord, AggregateRecord)
//! - **rules**: Per-metric combination rules and their registry
//! - **error**: Error types
//!
//! # Data Flow
//!
//! ```text
//! Document → Extractor → MetricRecord ─┬→ Aggregator → AggregateRecord → History → DatedSnapshot
//!                                      └→ Inverter   → InvertedIndex
//! ```

pub mod error;
pub mod rules;
pub mod types;

// Re-export commonly used types
pub use error::{StatsError, StatsResult};
pub use rules::{CombineFn, MetricSpec, Rule, RuleRegistry, ValueKind};
pub use types::{
    AggregateRecord, DocumentKey, DocumentKind, MetricRecord, MetricValue, Scope,
};
