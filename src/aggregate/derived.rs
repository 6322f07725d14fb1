//! Metrics derived from already-combined aggregates
//!
//! Publisher metrics are computed once per publisher and then combine into
//! the global record like any other metric. Global metrics need the whole
//! corpus (e.g. which identifiers another publisher references) and are
//! computed after combination.

use crate::stats::{AggregateRecord, MetricValue};
use std::collections::BTreeMap;

fn map_of<'a>(record: &'a AggregateRecord, name: &str) -> Option<&'a BTreeMap<String, MetricValue>> {
    record.get(name).and_then(MetricValue::as_map)
}

fn count_map(pairs: impl IntoIterator<Item = (String, i64)>) -> BTreeMap<String, i64> {
    pairs.into_iter().collect()
}

/// Add the publisher-level metrics
pub fn add_publisher_metrics(
    record: &mut AggregateRecord,
    publisher: &str,
    documents_aggregated: i64,
    documents_not_aggregated: i64,
) {
    let empty = BTreeMap::new();
    let identifiers = map_of(record, "iati_identifiers").unwrap_or(&empty).clone();

    let duplicates = count_map(
        identifiers
            .iter()
            .filter_map(|(id, n)| n.as_count().filter(|n| *n > 1).map(|n| (id.clone(), n))),
    );

    let has_org_file = if record.count("organisation_files") > 0 {
        "yes"
    } else {
        "no"
    };

    let versions = count_map(
        map_of(record, "versions")
            .unwrap_or(&empty)
            .keys()
            .map(|v| (v.clone(), 1)),
    );

    let without_own: BTreeMap<String, MetricValue> = map_of(record, "provider_activity_id")
        .unwrap_or(&empty)
        .iter()
        .filter(|(id, _)| !identifiers.contains_key(*id))
        .map(|(id, n)| (id.clone(), n.clone()))
        .collect();

    let spend = record
        .get("sum_commitments_and_disbursements_by_activity_id_usd")
        .cloned()
        .unwrap_or_else(MetricValue::empty_map);

    record.set("publishers", 1i64);
    record.set("documents_aggregated", documents_aggregated);
    record.set("documents_not_aggregated", documents_not_aggregated);
    record.set("publisher_unique_identifiers", identifiers.len() as i64);
    record.set("publisher_duplicate_identifiers", duplicates);
    record.set("publisher_has_org_file", count_map([(has_org_file.to_string(), 1)]));
    record.set("publishers_per_version", versions);
    record.set("provider_activity_id_without_own", without_own);
    record.set(
        "iati_identifiers_by_publisher_id",
        single(publisher, MetricValue::Map(identifiers)),
    );
    record.set(
        "sum_commitments_and_disbursements_by_activity_id_by_publisher_id_usd",
        single(publisher, spend),
    );
}

fn single(key: &str, value: MetricValue) -> BTreeMap<String, MetricValue> {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value);
    map
}

/// Add the global-only metrics
pub fn add_global_metrics(record: &mut AggregateRecord) {
    let empty = BTreeMap::new();
    let identifiers = map_of(record, "iati_identifiers").unwrap_or(&empty);

    let unique = identifiers.len() as i64;
    let duplicates = count_map(
        identifiers
            .iter()
            .filter_map(|(id, n)| n.as_count().filter(|n| *n > 1).map(|n| (id.clone(), n))),
    );

    let referenced = map_of(record, "provider_activity_id_without_own").unwrap_or(&empty);

    let mut traceable_activities = BTreeMap::new();
    let mut total_activities = BTreeMap::new();
    for (publisher, ids) in map_of(record, "iati_identifiers_by_publisher_id").unwrap_or(&empty) {
        let mut traceable = 0i64;
        let mut total = 0i64;
        for (id, n) in ids.as_map().unwrap_or(&empty) {
            let n = n.as_count().unwrap_or(0);
            total += n;
            if referenced.contains_key(id) {
                traceable += n;
            }
        }
        traceable_activities.insert(publisher.clone(), traceable);
        total_activities.insert(publisher.clone(), total);
    }

    let mut traceable_spend = BTreeMap::new();
    let mut total_spend = BTreeMap::new();
    let spend_by_publisher = map_of(
        record,
        "sum_commitments_and_disbursements_by_activity_id_by_publisher_id_usd",
    )
    .unwrap_or(&empty);
    for (publisher, by_activity) in spend_by_publisher {
        let mut traceable = 0.0;
        let mut total = 0.0;
        for (id, value) in by_activity.as_map().unwrap_or(&empty) {
            let value = value.as_f64().unwrap_or(0.0);
            total += value;
            if referenced.contains_key(id) {
                traceable += value;
            }
        }
        traceable_spend.insert(publisher.clone(), traceable);
        total_spend.insert(publisher.clone(), total);
    }

    record.set("unique_identifiers", unique);
    record.set("duplicate_identifiers", duplicates);
    record.set("traceable_activities_by_publisher_id", traceable_activities);
    record.set(
        "traceable_activities_by_publisher_id_denominator",
        total_activities,
    );
    record.set(
        "traceable_sum_commitments_and_disbursements_by_publisher_id",
        traceable_spend,
    );
    record.set(
        "traceable_sum_commitments_and_disbursements_by_publisher_id_denominator",
        total_spend,
    );
}
