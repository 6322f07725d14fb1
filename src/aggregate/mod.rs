//! Aggregation
//!
//! Combines MetricRecords into one AggregateRecord per publisher, then
//! combines the publisher records into the global record:
//!
//! ```text
//! loop/<pub>/*.json ──rules──▶ AggregateRecord(pub) ──rules──▶ AggregateRecord(global)
//!                      + publisher metrics              + global metrics
//! ```
//!
//! Every rule is associative and commutative, so the global record never
//! looks at individual documents.

pub mod derived;
mod records;
pub mod traceable;

pub use records::{PublisherRecords, RecordSet};
pub use traceable::{traceable_rows, write_traceable_csv, TraceableRow};

use crate::output::{read_json, write_json, OutputLayout};
use crate::stats::{AggregateRecord, MetricRecord, RuleRegistry, Scope, StatsResult};

/// Outcome of one aggregate run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSummary {
    pub publishers: usize,
    pub documents_aggregated: i64,
    pub documents_not_aggregated: i64,
}

/// Applies the rule registry at publisher and global scope
#[derive(Debug)]
pub struct Aggregator {
    registry: RuleRegistry,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(RuleRegistry::standard())
    }
}

impl Aggregator {
    pub fn new(registry: RuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Combine one publisher's records
    ///
    /// A publisher without any usable record still gets a record, with every
    /// counter at zero.
    pub fn aggregate_publisher(
        &self,
        publisher: &str,
        records: &[MetricRecord],
        not_aggregated: i64,
    ) -> AggregateRecord {
        let mut aggregate = AggregateRecord::new(Scope::Publisher(publisher.to_string()));
        aggregate.metrics = self.registry.identity_metrics();

        for record in records {
            self.registry.combine_into(&mut aggregate.metrics, &record.metrics);
        }

        derived::add_publisher_metrics(
            &mut aggregate,
            publisher,
            records.len() as i64,
            not_aggregated,
        );
        aggregate
    }

    /// Combine publisher records into the global record
    pub fn combine_global<'a>(
        &self,
        publishers: impl IntoIterator<Item = &'a AggregateRecord>,
    ) -> AggregateRecord {
        let mut global = AggregateRecord::new(Scope::Global);
        global.metrics = self.registry.identity_metrics();

        for publisher in publishers {
            self.registry.combine_into(&mut global.metrics, &publisher.metrics);
        }

        derived::add_global_metrics(&mut global);
        global
    }

    /// Aggregate a loaded record set
    pub fn aggregate(&self, set: &RecordSet) -> (Vec<AggregateRecord>, AggregateRecord) {
        let publishers: Vec<AggregateRecord> = set
            .publishers
            .iter()
            .map(|(publisher, p)| self.aggregate_publisher(publisher, &p.records, p.not_aggregated))
            .collect();
        let global = self.combine_global(&publishers);
        (publishers, global)
    }

    /// Run the aggregate stage against an output directory
    pub fn run(&self, layout: &OutputLayout) -> StatsResult<AggregateSummary> {
        let set = RecordSet::load(layout)?;
        tracing::info!(
            publishers = set.publishers.len(),
            records = set.record_count(),
            "Starting aggregation"
        );
        let (publishers, global) = self.aggregate(&set);

        // Publishers gone from the corpus must not keep a stale record
        let publisher_dir = layout.publisher_aggregate_dir();
        if publisher_dir.exists() {
            std::fs::remove_dir_all(&publisher_dir)?;
        }
        std::fs::create_dir_all(&publisher_dir)?;

        for record in &publishers {
            if let Scope::Publisher(id) = &record.scope {
                write_json(&layout.publisher_aggregate_path(id), record)?;
            }
        }
        write_json(&layout.global_aggregate_path(), &global)?;

        let summary = AggregateSummary {
            publishers: publishers.len(),
            documents_aggregated: global.count("documents_aggregated"),
            documents_not_aggregated: global.count("documents_not_aggregated"),
        };

        tracing::info!(
            publishers = summary.publishers,
            aggregated = summary.documents_aggregated,
            not_aggregated = summary.documents_not_aggregated,
            "Aggregation complete"
        );

        Ok(summary)
    }
}

/// Load the global aggregate written by the last aggregate run
pub fn load_global(layout: &OutputLayout) -> StatsResult<AggregateRecord> {
    read_json(&layout.global_aggregate_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{to_json_bytes, write_bytes, LoopManifest};
    use crate::stats::{DocumentKey, DocumentKind, MetricValue};
    use tempfile::tempdir;

    fn record(publisher: &str, file: &str, identifier: &str, amount: f64) -> MetricRecord {
        let mut r = MetricRecord::new(&DocumentKey::new(publisher, file), DocumentKind::Activity);
        r.set("activities", 1i64);
        r.set("activity_files", 1i64);
        r.set("iati_identifiers", MetricValue::counts([(identifier, 1)]));
        r.set("versions", MetricValue::counts([("2.03", 1)]));
        r.set(
            "narrative_languages",
            MetricValue::Set([publisher.to_string()].into_iter().collect()),
        );
        r.set("latest_transaction_date", format!("2023-0{}-01", file.len() % 9));
        let mut spend = std::collections::BTreeMap::new();
        spend.insert(identifier.to_string(), MetricValue::Amount(amount));
        r.set("sum_commitments_and_disbursements_by_activity_id_usd", spend);
        r.set("reporting_org_ref", publisher);
        r
    }

    fn corpus() -> RecordSet {
        let mut set = RecordSet::default();
        set.publishers.insert(
            "a".into(),
            PublisherRecords {
                records: vec![record("a", "1.xml", "A-1", 10.0), record("a", "22.xml", "A-2", 5.0)],
                not_aggregated: 1,
            },
        );
        set.publishers.insert(
            "b".into(),
            PublisherRecords {
                records: vec![record("b", "333.xml", "A-1", 1.5)],
                not_aggregated: 0,
            },
        );
        set.publishers.insert("empty".into(), PublisherRecords::default());
        set
    }

    #[test]
    fn test_publisher_aggregate() {
        let aggregator = Aggregator::default();
        let set = corpus();
        let a = &set.publishers["a"];
        let record = aggregator.aggregate_publisher("a", &a.records, a.not_aggregated);

        assert_eq!(record.scope, Scope::Publisher("a".into()));
        assert_eq!(record.count("activities"), 2);
        assert_eq!(record.count("documents_aggregated"), 2);
        assert_eq!(record.count("documents_not_aggregated"), 1);
        assert_eq!(record.get("latest_transaction_date"), Some(&MetricValue::from("2023-06-01")));
        assert!(record.get("reporting_org_ref").is_none());
    }

    #[test]
    fn test_empty_publisher_has_zero_counters() {
        let aggregator = Aggregator::default();
        let record = aggregator.aggregate_publisher("empty", &[], 0);
        assert_eq!(record.count("activities"), 0);
        assert_eq!(record.count("documents_aggregated"), 0);
        assert_eq!(record.count("publishers"), 1);
        assert_eq!(record.get("iati_identifiers"), Some(&MetricValue::empty_map()));
    }

    #[test]
    fn test_global_equals_combined_publishers() {
        let aggregator = Aggregator::default();
        let set = corpus();
        let (publishers, global) = aggregator.aggregate(&set);

        // Combining all records directly gives the same combinable metrics
        let mut direct = aggregator.registry().identity_metrics();
        for record in set.iter() {
            aggregator.registry().combine_into(&mut direct, &record.metrics);
        }
        for name in ["activities", "iati_identifiers", "narrative_languages", "latest_transaction_date"] {
            assert_eq!(global.get(name), direct.get(name), "{}", name);
        }

        // And the order publishers are combined in does not matter
        let reversed = aggregator.combine_global(publishers.iter().rev());
        assert_eq!(reversed, global);

        assert_eq!(global.count("publishers"), 3);
        assert_eq!(global.count("documents_aggregated"), 3);
        assert_eq!(global.count("documents_not_aggregated"), 1);
        assert_eq!(global.count("unique_identifiers"), 2);
        assert_eq!(
            global.get("duplicate_identifiers"),
            Some(&MetricValue::counts([("A-1", 2)]))
        );
    }

    #[test]
    fn test_run_is_idempotent() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let mut manifest = LoopManifest::new("run");
        for (publisher, file, id) in [("a", "1.xml", "A-1"), ("b", "1.xml", "B-1")] {
            let r = record(publisher, file, id, 1.0);
            let bytes = to_json_bytes(&r).unwrap();
            write_bytes(&layout.record_path(&r.key()), &bytes).unwrap();
            manifest.record_success(&r.key(), crc32fast::hash(&bytes));
        }
        crate::output::write_json(&layout.manifest_path(), &manifest).unwrap();

        // A stale publisher record from an earlier run
        write_json(
            &layout.publisher_aggregate_path("gone"),
            &AggregateRecord::new(Scope::Publisher("gone".into())),
        )
        .unwrap();

        let aggregator = Aggregator::default();
        let first = aggregator.run(&layout).unwrap();
        let global_first = std::fs::read(layout.global_aggregate_path()).unwrap();
        let a_first = std::fs::read(layout.publisher_aggregate_path("a")).unwrap();

        let second = aggregator.run(&layout).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(layout.global_aggregate_path()).unwrap(), global_first);
        assert_eq!(std::fs::read(layout.publisher_aggregate_path("a")).unwrap(), a_first);

        assert!(!layout.publisher_aggregate_path("gone").exists());
        assert_eq!(first.publishers, 2);
        assert_eq!(load_global(&layout).unwrap().count("documents_aggregated"), 2);
    }
}
