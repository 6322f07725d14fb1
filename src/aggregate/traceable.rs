//! Traceability report
//!
//! How much of each publisher's activity (by count and by spend) is
//! referenced as a funding source by another publisher's transactions.

use crate::stats::{AggregateRecord, MetricValue, StatsResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// One CSV row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceableRow {
    pub publisher: String,
    pub traceable_activities: i64,
    pub total_activities: i64,
    pub pct_activities: f64,
    pub traceable_spend: f64,
    pub total_spend: f64,
    /// Empty when the publisher reports no spend
    pub pct_spend: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn numbers(record: &AggregateRecord, name: &str) -> BTreeMap<String, f64> {
    record
        .get(name)
        .and_then(MetricValue::as_map)
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_f64().unwrap_or(0.0)))
                .collect()
        })
        .unwrap_or_default()
}

/// Rows for every publisher with at least one traceable activity
pub fn traceable_rows(global: &AggregateRecord) -> Vec<TraceableRow> {
    let traceable_activities = numbers(global, "traceable_activities_by_publisher_id");
    let total_activities = numbers(global, "traceable_activities_by_publisher_id_denominator");
    let traceable_spend = numbers(
        global,
        "traceable_sum_commitments_and_disbursements_by_publisher_id",
    );
    let total_spend = numbers(
        global,
        "traceable_sum_commitments_and_disbursements_by_publisher_id_denominator",
    );

    let mut rows = Vec::new();
    for (publisher, total) in &total_activities {
        let traceable = traceable_activities.get(publisher).copied().unwrap_or(0.0);
        if *total == 0.0 || traceable == 0.0 {
            continue;
        }

        let spend = traceable_spend.get(publisher).copied().unwrap_or(0.0);
        let spend_total = total_spend.get(publisher).copied().unwrap_or(0.0);

        rows.push(TraceableRow {
            publisher: publisher.clone(),
            traceable_activities: traceable as i64,
            total_activities: *total as i64,
            pct_activities: round2(traceable / total * 100.0),
            traceable_spend: round2(spend),
            total_spend: round2(spend_total),
            pct_spend: (spend_total != 0.0).then(|| round2(spend / spend_total * 100.0)),
        });
    }
    rows
}

const HEADER: [&str; 7] = [
    "publisher",
    "traceable_activities",
    "total_activities",
    "pct_activities",
    "traceable_spend",
    "total_spend",
    "pct_spend",
];

/// Write the report as CSV with a header row, present even without rows
pub fn write_traceable_csv<W: Write>(rows: &[TraceableRow], writer: W) -> StatsResult<()> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv.write_record(HEADER)?;
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}
