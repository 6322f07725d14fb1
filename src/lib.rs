//! # Aidstats
//!
//! Aid Transparency Statistics - extracts per-document metrics from a corpus
//! of activity and organisation reports, aggregates them per publisher and
//! globally, builds inverted indices, and replays the version-control history
//! of its own output into dated time series.
//!
//! ## Pipeline
//!
//! ```text
//! data/<publisher>/<file> ─loop─▶ loop/ ─aggregate─▶ aggregated/ ─┐
//!                                   └──invert──▶ invert/           │ committed
//!                                                                  ▼
//!                            gitaggregate[-publisher]/ ◀─replay── history
//! ```
//!
//! ## Modules
//!
//! - [`stats`]: Metric values, records and combination rules
//! - [`reference`]: Codelists, codelist mapping and exchange rates
//! - [`extract`]: Document parsing and the extraction worker pool
//! - [`aggregate`]: Publisher and global aggregation, traceability report
//! - [`index`]: Inverted indices from metric values to documents
//! - [`history`]: History logs and the temporal aggregator
//! - [`output`]: Output directory layout and manifests
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aidstats::{Aggregator, Extractor, LoopOptions, OutputLayout, ReferenceData};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reference = ReferenceData::load(Path::new("helpers"))?;
//!     let extractor = Arc::new(Extractor::new(Arc::new(reference)));
//!     let layout = OutputLayout::new("out");
//!
//!     let summary = aidstats::run_loop(extractor, Path::new("data"), &layout, &LoopOptions::default()).await?;
//!     println!("Extracted {} of {} documents", summary.extracted, summary.documents);
//!
//!     let aggregated = Aggregator::default().run(&layout)?;
//!     println!("Aggregated {} publishers", aggregated.publishers);
//!
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod extract;
pub mod history;
pub mod index;
pub mod output;
pub mod reference;
pub mod stats;

// Re-export top-level types for convenience
pub use stats::{
    AggregateRecord, DocumentKey, DocumentKind, MetricRecord, MetricValue, Rule, RuleRegistry,
    Scope, StatsError, StatsResult,
};

pub use extract::{discover_documents, run_loop, Extractor, LoopOptions, LoopSummary};

pub use aggregate::{
    load_global, traceable_rows, write_traceable_csv, AggregateSummary, Aggregator, RecordSet,
    TraceableRow,
};

pub use index::{InvertSummary, InvertedIndex, Inverter};

pub use history::{
    Commit, Cursor, DatedSnapshot, GitHistoryLog, HistoryLog, MemoryHistoryLog, SnapshotStore,
    TemporalAggregator, TemporalOptions, TemporalSummary, TimeSeries,
};

pub use output::{LoopManifest, OutputLayout};

pub use reference::ReferenceData;

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};
