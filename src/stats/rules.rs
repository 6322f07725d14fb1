//! Combination rules
//!
//! Every metric name maps to one pure combination function. All rules are
//! associative and commutative, so publisher aggregates can be combined
//! into the global aggregate without touching individual documents again.

use crate::stats::types::MetricValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Pure function combining two values of one metric
pub type CombineFn = fn(&MetricValue, &MetricValue) -> MetricValue;

/// How values of a metric combine across documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Add counts and amounts, key-wise for maps
    Sum,
    /// Set union, key-wise for maps
    Union,
    /// Boolean or
    Or,
    /// Largest value (dates compare as ISO strings)
    Max,
    /// Smallest value
    Min,
    /// Per-document only, never aggregated
    Skip,
}

impl Rule {
    /// The combination function for this rule, `None` for `Skip`
    pub fn function(&self) -> Option<CombineFn> {
        match self {
            Rule::Sum => Some(sum),
            Rule::Union => Some(union),
            Rule::Or => Some(or),
            Rule::Max => Some(max),
            Rule::Min => Some(min),
            Rule::Skip => None,
        }
    }
}

/// Shape of a metric's value, used to seed empty aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Count,
    Amount,
    Map,
    Set,
    Flag,
    Date,
    Text,
}

/// Declared rule for one metric
#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub name: String,
    pub kind: ValueKind,
    pub rule: Rule,
    combine: Option<CombineFn>,
}

impl MetricSpec {
    /// Identity element of this metric's rule, if it has one
    ///
    /// Max/Min have no identity: the metric stays absent until a value appears.
    pub fn identity(&self) -> Option<MetricValue> {
        match (self.rule, self.kind) {
            (Rule::Sum | Rule::Union | Rule::Or, ValueKind::Count) => Some(MetricValue::Count(0)),
            (Rule::Sum | Rule::Union | Rule::Or, ValueKind::Amount) => {
                Some(MetricValue::Amount(0.0))
            }
            (Rule::Sum | Rule::Union | Rule::Or, ValueKind::Map) => Some(MetricValue::empty_map()),
            (Rule::Sum | Rule::Union | Rule::Or, ValueKind::Set) => {
                Some(MetricValue::Set(Default::default()))
            }
            (Rule::Sum | Rule::Union | Rule::Or, ValueKind::Flag) => Some(MetricValue::Flag(false)),
            _ => None,
        }
    }

    pub fn combine(&self, a: &MetricValue, b: &MetricValue) -> Option<MetricValue> {
        self.combine.map(|f| f(a, b))
    }
}

/// Metrics every aggregate knows about, with their kind and rule
const STANDARD_METRICS: &[(&str, ValueKind, Rule)] = &[
    // File level
    ("file_size", ValueKind::Count, Rule::Sum),
    ("file_size_bins", ValueKind::Map, Rule::Sum),
    ("versions", ValueKind::Map, Rule::Sum),
    ("version_mismatch", ValueKind::Map, Rule::Sum),
    ("activity_files", ValueKind::Count, Rule::Sum),
    ("organisation_files", ValueKind::Count, Rule::Sum),
    ("reporting_org_ref", ValueKind::Text, Rule::Skip),
    // Activity level
    ("activities", ValueKind::Count, Rule::Sum),
    ("iati_identifiers", ValueKind::Map, Rule::Sum),
    ("reporting_orgs", ValueKind::Map, Rule::Sum),
    ("participating_orgs", ValueKind::Map, Rule::Sum),
    ("participating_orgs_by_role", ValueKind::Map, Rule::Sum),
    ("hierarchies", ValueKind::Map, Rule::Sum),
    ("currencies", ValueKind::Map, Rule::Sum),
    ("elements", ValueKind::Map, Rule::Sum),
    ("elements_total", ValueKind::Map, Rule::Sum),
    ("transaction_total", ValueKind::Count, Rule::Sum),
    ("transaction_months_with_year", ValueKind::Map, Rule::Sum),
    ("activity_dates", ValueKind::Map, Rule::Sum),
    ("sum_transactions_by_type_by_year", ValueKind::Map, Rule::Sum),
    ("sum_transactions_by_type_by_year_usd", ValueKind::Map, Rule::Sum),
    ("provider_activity_id", ValueKind::Map, Rule::Sum),
    (
        "sum_commitments_and_disbursements_by_activity_id_usd",
        ValueKind::Map,
        Rule::Sum,
    ),
    ("humanitarian", ValueKind::Count, Rule::Sum),
    ("count_budgets_by_type_by_year", ValueKind::Map, Rule::Sum),
    ("sum_budgets_by_type_by_year", ValueKind::Map, Rule::Sum),
    ("sum_budgets_by_type_by_year_usd", ValueKind::Map, Rule::Sum),
    ("funding_org_transaction_stats", ValueKind::Map, Rule::Sum),
    ("funding_org_valid_prefixes", ValueKind::Map, Rule::Sum),
    ("accountable_org_transaction_stats", ValueKind::Map, Rule::Sum),
    ("accountable_org_valid_prefixes", ValueKind::Map, Rule::Sum),
    ("extending_org_transaction_stats", ValueKind::Map, Rule::Sum),
    ("extending_org_valid_prefixes", ValueKind::Map, Rule::Sum),
    ("implementing_org_transaction_stats", ValueKind::Map, Rule::Sum),
    ("implementing_org_valid_prefixes", ValueKind::Map, Rule::Sum),
    ("provider_org_transaction_stats", ValueKind::Map, Rule::Sum),
    ("provider_org_valid_prefixes", ValueKind::Map, Rule::Sum),
    ("receiver_org_transaction_stats", ValueKind::Map, Rule::Sum),
    ("receiver_org_valid_prefixes", ValueKind::Map, Rule::Sum),
    ("secondary_reported", ValueKind::Flag, Rule::Or),
    ("narrative_languages", ValueKind::Set, Rule::Union),
    ("latest_transaction_date", ValueKind::Date, Rule::Max),
    ("earliest_activity_date", ValueKind::Date, Rule::Min),
    ("codelist_values", ValueKind::Map, Rule::Sum),
    // Organisation level
    ("organisations", ValueKind::Count, Rule::Sum),
    // Publisher level
    ("documents_aggregated", ValueKind::Count, Rule::Sum),
    ("documents_not_aggregated", ValueKind::Count, Rule::Sum),
    ("publishers", ValueKind::Count, Rule::Sum),
    ("publisher_unique_identifiers", ValueKind::Count, Rule::Sum),
    ("publisher_duplicate_identifiers", ValueKind::Map, Rule::Sum),
    ("publisher_has_org_file", ValueKind::Map, Rule::Sum),
    ("publishers_per_version", ValueKind::Map, Rule::Sum),
    ("provider_activity_id_without_own", ValueKind::Map, Rule::Sum),
    ("iati_identifiers_by_publisher_id", ValueKind::Map, Rule::Sum),
    (
        "sum_commitments_and_disbursements_by_activity_id_by_publisher_id_usd",
        ValueKind::Map,
        Rule::Sum,
    ),
    // Global only, derived after combination
    ("unique_identifiers", ValueKind::Count, Rule::Skip),
    ("duplicate_identifiers", ValueKind::Map, Rule::Skip),
    ("traceable_activities_by_publisher_id", ValueKind::Map, Rule::Skip),
    (
        "traceable_activities_by_publisher_id_denominator",
        ValueKind::Map,
        Rule::Skip,
    ),
    (
        "traceable_sum_commitments_and_disbursements_by_publisher_id",
        ValueKind::Map,
        Rule::Skip,
    ),
    (
        "traceable_sum_commitments_and_disbursements_by_publisher_id_denominator",
        ValueKind::Map,
        Rule::Skip,
    ),
];

/// Registry mapping metric name → combination rule
#[derive(Debug, Default)]
pub struct RuleRegistry {
    specs: HashMap<String, MetricSpec>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every metric the pipeline produces
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (name, kind, rule) in STANDARD_METRICS {
            registry.register(name, *kind, *rule);
        }
        registry
    }

    /// Register (or replace) the rule for a metric
    pub fn register(&mut self, name: &str, kind: ValueKind, rule: Rule) {
        self.specs.insert(
            name.to_string(),
            MetricSpec {
                name: name.to_string(),
                kind,
                rule,
                combine: rule.function(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&MetricSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// A metrics map holding the identity of every combinable metric
    pub fn identity_metrics(&self) -> BTreeMap<String, MetricValue> {
        self.specs
            .values()
            .filter_map(|spec| spec.identity().map(|v| (spec.name.clone(), v)))
            .collect()
    }

    /// Fold `source` into `target` metric by metric
    ///
    /// Unknown and `Skip` metrics are left out.
    pub fn combine_into(
        &self,
        target: &mut BTreeMap<String, MetricValue>,
        source: &BTreeMap<String, MetricValue>,
    ) {
        for (name, value) in source {
            let spec = match self.specs.get(name) {
                Some(spec) => spec,
                None => {
                    tracing::debug!(metric = %name, "No combination rule, skipping");
                    continue;
                }
            };

            let combined = match target.get(name) {
                Some(existing) => spec.combine(existing, value),
                None if spec.rule == Rule::Skip => None,
                None => Some(value.clone()),
            };

            if let Some(combined) = combined {
                target.insert(name.clone(), combined);
            }
        }
    }
}

/// Rank used to resolve mismatched variants the same way regardless of order
fn rank(v: &MetricValue) -> u8 {
    match v {
        MetricValue::Flag(_) => 0,
        MetricValue::Count(_) => 1,
        MetricValue::Amount(_) => 2,
        MetricValue::Text(_) => 3,
        MetricValue::Set(_) => 4,
        MetricValue::Map(_) => 5,
    }
}

fn higher_rank(a: &MetricValue, b: &MetricValue) -> MetricValue {
    if rank(a) >= rank(b) {
        a.clone()
    } else {
        b.clone()
    }
}

/// Key-wise merge of two maps, combining shared keys with `f`
fn merge_maps(
    a: &BTreeMap<String, MetricValue>,
    b: &BTreeMap<String, MetricValue>,
    f: CombineFn,
) -> MetricValue {
    let mut out = a.clone();
    for (key, value) in b {
        let merged = match out.get(key) {
            Some(existing) => f(existing, value),
            None => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    MetricValue::Map(out)
}

fn compare(a: &MetricValue, b: &MetricValue) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x
            .partial_cmp(&y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| rank(a).cmp(&rank(b))),
        _ => match (a, b) {
            (MetricValue::Text(x), MetricValue::Text(y)) => x.cmp(y),
            (MetricValue::Flag(x), MetricValue::Flag(y)) => x.cmp(y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

pub fn sum(a: &MetricValue, b: &MetricValue) -> MetricValue {
    match (a, b) {
        // Counts past the integer range continue as amounts
        (MetricValue::Count(x), MetricValue::Count(y)) => x
            .checked_add(*y)
            .map(MetricValue::Count)
            .unwrap_or(MetricValue::Amount(*x as f64 + *y as f64)),
        (MetricValue::Map(x), MetricValue::Map(y)) => merge_maps(x, y, sum),
        (MetricValue::Flag(x), MetricValue::Flag(y)) => MetricValue::Flag(*x || *y),
        (MetricValue::Set(_), MetricValue::Set(_)) => union(a, b),
        (MetricValue::Text(_), MetricValue::Text(_)) => max(a, b),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => MetricValue::Amount(x + y),
            _ => higher_rank(a, b),
        },
    }
}

pub fn union(a: &MetricValue, b: &MetricValue) -> MetricValue {
    match (a, b) {
        (MetricValue::Set(x), MetricValue::Set(y)) => {
            MetricValue::Set(x.union(y).cloned().collect())
        }
        (MetricValue::Map(x), MetricValue::Map(y)) => merge_maps(x, y, union),
        _ => max(a, b),
    }
}

pub fn or(a: &MetricValue, b: &MetricValue) -> MetricValue {
    match (a, b) {
        (MetricValue::Flag(x), MetricValue::Flag(y)) => MetricValue::Flag(*x || *y),
        (MetricValue::Map(x), MetricValue::Map(y)) => merge_maps(x, y, or),
        _ => union(a, b),
    }
}

pub fn max(a: &MetricValue, b: &MetricValue) -> MetricValue {
    match (a, b) {
        (MetricValue::Map(x), MetricValue::Map(y)) => merge_maps(x, y, max),
        _ => {
            if compare(a, b) == Ordering::Less {
                b.clone()
            } else {
                a.clone()
            }
        }
    }
}

pub fn min(a: &MetricValue, b: &MetricValue) -> MetricValue {
    match (a, b) {
        (MetricValue::Map(x), MetricValue::Map(y)) => merge_maps(x, y, min),
        _ => {
            if compare(a, b) == Ordering::Greater {
                b.clone()
            } else {
                a.clone()
            }
        }
    }
}
