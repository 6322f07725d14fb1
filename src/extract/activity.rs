//! Activity metrics
//!
//! Statistics calculated on each `iati-activity` of an activity file and
//! summed over the whole file.

use crate::extract::document::Element;
use crate::extract::{count_elements, iso_date};
use crate::reference::ReferenceData;
use crate::stats::MetricRecord;
use std::collections::{BTreeMap, BTreeSet};

/// Version used when a document declares none or an unknown one
pub const DEFAULT_VERSION: &str = "1.01";

/// Versions in which `@humanitarian` is part of the standard
const HUMANITARIAN_ATTRIBUTE_VERSIONS: &[&str] = &["2.02", "2.03"];

/// DAC 5-digit purpose codes of humanitarian aid
const HUMANITARIAN_DAC_5: &[&str] = &[
    "72010", "72011", "72012", "72040", "72050", "73010", "74010", "74020",
];

/// DAC 3-digit sector codes of humanitarian aid
const HUMANITARIAN_DAC_3: &[&str] = &["720", "730", "740"];

/// Participating organisation roles with their own reference statistics
const ORG_ROLES: &[(&str, &str)] = &[
    ("funding", "1"),
    ("accountable", "2"),
    ("extending", "3"),
    ("implementing", "4"),
];

/// Transaction organisations with their own reference statistics
const TRANSACTION_ORGS: &[(&str, &str)] = &[
    ("provider", "provider-org"),
    ("receiver", "receiver-org"),
];

type Counts = BTreeMap<String, i64>;
type NestedCounts = BTreeMap<String, Counts>;

/// Major version of the standard, which decides the code values in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorVersion {
    V1,
    V2,
}

impl MajorVersion {
    pub fn of(version: &str) -> Self {
        if version.starts_with("2.") {
            MajorVersion::V2
        } else {
            MajorVersion::V1
        }
    }

    pub fn incoming_funds(&self) -> &'static str {
        match self {
            MajorVersion::V1 => "IF",
            MajorVersion::V2 => "1",
        }
    }

    pub fn commitment(&self) -> &'static str {
        match self {
            MajorVersion::V1 => "C",
            MajorVersion::V2 => "2",
        }
    }

    pub fn disbursement(&self) -> &'static str {
        match self {
            MajorVersion::V1 => "D",
            MajorVersion::V2 => "3",
        }
    }

    pub fn expenditure(&self) -> &'static str {
        match self {
            MajorVersion::V1 => "E",
            MajorVersion::V2 => "4",
        }
    }

    /// Sector vocabulary of DAC 5-digit purpose codes
    pub fn dac_5(&self) -> &'static str {
        match self {
            MajorVersion::V1 => "DAC",
            MajorVersion::V2 => "1",
        }
    }

    /// Sector vocabulary of DAC 3-digit sector codes
    pub fn dac_3(&self) -> &'static str {
        match self {
            MajorVersion::V1 => "DAC-3",
            MajorVersion::V2 => "2",
        }
    }
}

/// Resolve the document version against the Version codelist
pub fn resolve_version(declared: Option<&str>, reference: &ReferenceData) -> String {
    match declared {
        Some(v) if reference.in_codelist("Version", v) => v.to_string(),
        _ => DEFAULT_VERSION.to_string(),
    }
}

/// Running totals over every activity in one file
#[derive(Debug, Default)]
pub struct ActivityTally {
    activities: i64,
    iati_identifiers: Counts,
    reporting_orgs: Counts,
    participating_orgs: Counts,
    participating_orgs_by_role: NestedCounts,
    hierarchies: Counts,
    currencies: Counts,
    elements: Counts,
    elements_total: Counts,
    transaction_total: i64,
    transaction_months_with_year: Counts,
    activity_dates: NestedCounts,
    /// type → currency → year → amount
    sums: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    /// type → year → USD
    sums_usd: BTreeMap<String, BTreeMap<String, f64>>,
    provider_activity_id: Counts,
    commitments_and_disbursements_usd: BTreeMap<String, f64>,
    humanitarian: i64,
    /// budget type → year → count
    budget_counts: NestedCounts,
    /// budget type → currency → year → amount
    budget_sums: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    /// budget type → year → USD
    budget_sums_usd: BTreeMap<String, BTreeMap<String, f64>>,
    /// organisation kind → statistic → count
    org_ref_stats: NestedCounts,
    /// organisation kind → identifier prefix → count
    org_ref_prefixes: NestedCounts,
    secondary_reported: bool,
    languages: BTreeSet<String>,
    latest_transaction_date: Option<String>,
    earliest_activity_date: Option<String>,
    codelist_values: NestedCounts,
    first_reporting_org: Option<String>,
    activity_versions: BTreeSet<String>,
}

impl ActivityTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared per-activity versions seen so far
    pub fn activity_versions(&self) -> &BTreeSet<String> {
        &self.activity_versions
    }

    /// Add one `iati-activity` element of a file with the given resolved version
    pub fn add(&mut self, activity: &Element, version: &str, reference: &ReferenceData) {
        let major = MajorVersion::of(version);
        self.activities += 1;

        let identifier = activity.value("iati-identifier").filter(|id| !id.is_empty());
        if let Some(id) = &identifier {
            *self.iati_identifiers.entry(id.clone()).or_insert(0) += 1;
        }

        if let Some(version) = activity.attr("version") {
            self.activity_versions.insert(version.to_string());
        }

        self.add_orgs(activity);

        let hierarchy = activity.attr("hierarchy").unwrap_or("1");
        *self.hierarchies.entry(hierarchy.to_string()).or_insert(0) += 1;

        let mut presence = Counts::new();
        count_elements(activity, "iati-activity", &mut presence, &mut self.elements_total);
        for path in presence.into_keys() {
            *self.elements.entry(path).or_insert(0) += 1;
        }

        for date in activity.children_named("activity-date") {
            let kind = date.attr("type").unwrap_or("null").to_string();
            let value = date.attr("iso-date").and_then(iso_date);
            if let Some(value) = &value {
                if self
                    .earliest_activity_date
                    .as_ref()
                    .map_or(true, |current| value < current)
                {
                    self.earliest_activity_date = Some(value.clone());
                }
            }
            *self
                .activity_dates
                .entry(kind)
                .or_default()
                .entry(value.unwrap_or_else(|| "null".to_string()))
                .or_insert(0) += 1;
        }

        self.add_transactions(activity, identifier.as_deref(), major, reference);
        self.add_budgets(activity, reference);
        self.add_org_references(activity, reference);

        if is_humanitarian(activity, version) {
            self.humanitarian += 1;
        }

        activity.walk(&mut |el| {
            if let Some(lang) = el.attr("xml:lang") {
                self.languages.insert(lang.to_string());
            }
        });

        for mapping in reference.mappings() {
            if let Some(path) = mapping.path.strip_prefix("iati-activity/") {
                for code in activity.values(path) {
                    *self
                        .codelist_values
                        .entry(mapping.path.clone())
                        .or_default()
                        .entry(code)
                        .or_insert(0) += 1;
                }
            }
        }
    }

    fn add_orgs(&mut self, activity: &Element) {
        match activity.child("reporting-org") {
            Some(org) => {
                let reference = org.attr("ref").unwrap_or("null").to_string();
                if self.first_reporting_org.is_none() {
                    self.first_reporting_org = Some(reference.clone());
                }
                *self.reporting_orgs.entry(reference).or_insert(0) += 1;

                if matches!(org.attr("secondary-reporter"), Some("1" | "true")) {
                    self.secondary_reported = true;
                }
            }
            None => *self.reporting_orgs.entry("null".to_string()).or_insert(0) += 1,
        }

        // Each organisation counts once per activity
        let mut refs = BTreeSet::new();
        let mut by_role: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for org in activity.children_named("participating-org") {
            let reference = org.attr("ref").unwrap_or("null").to_string();
            let role = org.attr("role").unwrap_or("null").to_string();
            by_role.entry(role).or_default().insert(reference.clone());
            refs.insert(reference);
        }
        for reference in refs {
            *self.participating_orgs.entry(reference).or_insert(0) += 1;
        }
        for (role, refs) in by_role {
            let counts = self.participating_orgs_by_role.entry(role).or_default();
            for reference in refs {
                *counts.entry(reference).or_insert(0) += 1;
            }
        }
    }

    fn add_transactions(
        &mut self,
        activity: &Element,
        identifier: Option<&str>,
        major: MajorVersion,
        reference: &ReferenceData,
    ) {
        let default_currency = activity.attr("default-currency");
        let summed_types = [
            major.incoming_funds(),
            major.commitment(),
            major.disbursement(),
            major.expenditure(),
        ];
        let mut currencies = BTreeSet::new();
        let mut usd_commitments_and_disbursements = 0.0;
        let mut provider_ids = Counts::new();

        for transaction in activity.children_named("transaction") {
            self.transaction_total += 1;

            let value_el = transaction.child("value");
            let currency = value_el
                .and_then(|v| v.attr("currency"))
                .filter(|c| !c.is_empty())
                .or(default_currency);
            if let (Some(_), Some(currency)) = (value_el, currency) {
                currencies.insert(currency.to_string());
            }

            let date = transaction_date(transaction);
            if let Some(date) = &date {
                *self
                    .transaction_months_with_year
                    .entry(date[..7].to_string())
                    .or_insert(0) += 1;
                if self
                    .latest_transaction_date
                    .as_ref()
                    .map_or(true, |current| date > current)
                {
                    self.latest_transaction_date = Some(date.clone());
                }
            }

            for id in transaction.values("provider-org/@provider-activity-id") {
                *provider_ids.entry(id).or_insert(0) += 1;
            }

            let type_code = match transaction.value("transaction-type/@code") {
                Some(code) if summed_types.contains(&code.as_str()) => code,
                _ => continue,
            };
            let year = match date.as_ref().and_then(|d| d[..4].parse::<i32>().ok()) {
                Some(year) => year,
                None => continue,
            };
            let amount = value_el
                .and_then(|v| v.text.trim().replace(',', "").parse::<f64>().ok())
                .unwrap_or(0.0);
            let currency = currency.unwrap_or("null");

            *self
                .sums
                .entry(type_code.clone())
                .or_default()
                .entry(currency.to_string())
                .or_default()
                .entry(year.to_string())
                .or_insert(0.0) += amount;

            let usd = reference.usd_value(currency, amount, year);
            *self
                .sums_usd
                .entry(type_code.clone())
                .or_default()
                .entry(year.to_string())
                .or_insert(0.0) += usd;

            if type_code == major.commitment() || type_code == major.disbursement() {
                usd_commitments_and_disbursements += usd;
            }
        }

        for currency in currencies {
            *self.currencies.entry(currency).or_insert(0) += 1;
        }

        // An activity referencing itself is not traceable funding
        if let Some(id) = identifier {
            provider_ids.remove(id);
        }
        for (id, n) in provider_ids {
            *self.provider_activity_id.entry(id).or_insert(0) += n;
        }

        if let Some(id) = identifier {
            if usd_commitments_and_disbursements != 0.0 {
                *self
                    .commitments_and_disbursements_usd
                    .entry(id.to_string())
                    .or_insert(0.0) += usd_commitments_and_disbursements;
            }
        }
    }

    fn add_budgets(&mut self, activity: &Element, reference: &ReferenceData) {
        let default_currency = activity.attr("default-currency");

        for budget in activity.children_named("budget") {
            let year = match budget_year(budget) {
                Some(year) => year,
                None => continue,
            };
            let kind = budget.attr("type").unwrap_or("null").to_string();
            let value_el = budget.child("value");
            let amount = value_el
                .and_then(|v| v.text.trim().replace(',', "").parse::<f64>().ok())
                .unwrap_or(0.0);
            let currency = value_el
                .and_then(|v| v.attr("currency"))
                .filter(|c| !c.is_empty())
                .or(default_currency)
                .unwrap_or("null");

            *self
                .budget_counts
                .entry(kind.clone())
                .or_default()
                .entry(year.to_string())
                .or_insert(0) += 1;
            *self
                .budget_sums
                .entry(kind.clone())
                .or_default()
                .entry(currency.to_string())
                .or_default()
                .entry(year.to_string())
                .or_insert(0.0) += amount;
            *self
                .budget_sums_usd
                .entry(kind)
                .or_default()
                .entry(year.to_string())
                .or_insert(0.0) += reference.usd_value(currency, amount, year);
        }
    }

    fn add_org_references(&mut self, activity: &Element, reference: &ReferenceData) {
        let reporting_org = activity
            .children_named("reporting-org")
            .filter_map(|org| org.attr("ref"))
            .find(|r| !r.is_empty());

        for (kind, role) in ORG_ROLES {
            let orgs = activity
                .children_named("participating-org")
                .filter(|org| org.attr("role") == Some(*role));
            self.tally_org_references(kind, orgs, reporting_org, reference);
        }
        for (kind, element) in TRANSACTION_ORGS {
            let orgs = activity
                .children_named("transaction")
                .filter_map(|transaction| transaction.child(element));
            self.tally_org_references(kind, orgs, reporting_org, reference);
        }
    }

    /// Count how completely one kind of organisation is referenced
    ///
    /// Each statistic narrows the previous one: any `@ref`, a non-empty one,
    /// one naming an organisation other than the reporter, and one of those
    /// starting with a registered identifier prefix.
    fn tally_org_references<'a>(
        &mut self,
        kind: &str,
        orgs: impl Iterator<Item = &'a Element>,
        reporting_org: Option<&str>,
        reference: &ReferenceData,
    ) {
        let stats = self.org_ref_stats.entry(kind.to_string()).or_default();
        for name in ORG_REF_STATS {
            stats.entry(name.to_string()).or_insert(0);
        }
        let prefixes = self.org_ref_prefixes.entry(kind.to_string()).or_default();

        for org in orgs {
            *stats.entry("total_orgs".to_string()).or_insert(0) += 1;
            let org_ref = match org.attr("ref") {
                Some(org_ref) => org_ref,
                None => continue,
            };
            *stats.entry("total_refs".to_string()).or_insert(0) += 1;
            if org_ref.is_empty() {
                continue;
            }
            *stats.entry("total_full_refs".to_string()).or_insert(0) += 1;
            if Some(org_ref) == reporting_org {
                continue;
            }
            *stats.entry("total_notself_refs".to_string()).or_insert(0) += 1;
            if let Some(prefix) = reference.org_prefix(org_ref) {
                *stats.entry("total_valid_refs".to_string()).or_insert(0) += 1;
                *prefixes.entry(prefix.to_string()).or_insert(0) += 1;
            }
        }
    }

    /// Write the accumulated totals into a record
    pub fn write_into(self, record: &mut MetricRecord) {
        record.set("activities", self.activities);
        record.set("iati_identifiers", self.iati_identifiers);
        record.set("reporting_orgs", self.reporting_orgs);
        record.set("participating_orgs", self.participating_orgs);
        record.set("participating_orgs_by_role", self.participating_orgs_by_role);
        record.set("hierarchies", self.hierarchies);
        record.set("currencies", self.currencies);
        record.set("elements", self.elements);
        record.set("elements_total", self.elements_total);
        record.set("transaction_total", self.transaction_total);
        record.set(
            "transaction_months_with_year",
            self.transaction_months_with_year,
        );
        record.set("activity_dates", self.activity_dates);
        record.set("sum_transactions_by_type_by_year", self.sums);
        record.set("sum_transactions_by_type_by_year_usd", self.sums_usd);
        record.set("provider_activity_id", self.provider_activity_id);
        record.set(
            "sum_commitments_and_disbursements_by_activity_id_usd",
            self.commitments_and_disbursements_usd,
        );
        record.set("humanitarian", self.humanitarian);
        record.set("count_budgets_by_type_by_year", self.budget_counts);
        record.set("sum_budgets_by_type_by_year", self.budget_sums);
        record.set("sum_budgets_by_type_by_year_usd", self.budget_sums_usd);
        for (kind, stats) in self.org_ref_stats {
            record.set(&format!("{}_org_transaction_stats", kind), stats);
        }
        for (kind, prefixes) in self.org_ref_prefixes {
            record.set(&format!("{}_org_valid_prefixes", kind), prefixes);
        }
        record.set("secondary_reported", self.secondary_reported);
        record.set("narrative_languages", self.languages);
        record.set("codelist_values", self.codelist_values);
        if let Some(date) = self.latest_transaction_date {
            record.set("latest_transaction_date", date);
        }
        if let Some(date) = self.earliest_activity_date {
            record.set("earliest_activity_date", date);
        }
        if let Some(reporting_org) = self.first_reporting_org {
            record.set("reporting_org_ref", reporting_org);
        }
    }
}

/// Statistics of [`ActivityTally::tally_org_references`], present even when zero
const ORG_REF_STATS: &[&str] = &[
    "total_orgs",
    "total_refs",
    "total_full_refs",
    "total_notself_refs",
    "total_valid_refs",
];

/// Whether an activity counts as humanitarian
///
/// `@humanitarian` is honoured only in versions that define it. A false
/// `@humanitarian` on the activity vetoes every other signal, and on a
/// transaction it excludes that transaction's sectors.
fn is_humanitarian(activity: &Element, version: &str) -> bool {
    let flagged = |el: &Element| matches!(el.attr("humanitarian"), Some("1" | "true"));
    let vetoed = |el: &Element| matches!(el.attr("humanitarian"), Some("0" | "false"));

    if vetoed(activity) {
        return false;
    }

    let major = MajorVersion::of(version);
    let by_attribute = HUMANITARIAN_ATTRIBUTE_VERSIONS.contains(&version)
        && (flagged(activity) || activity.children_named("transaction").any(flagged));
    let by_transaction_sector = major == MajorVersion::V2
        && activity
            .children_named("transaction")
            .filter(|t| !vetoed(*t))
            .any(|t| has_humanitarian_sector(t, major));

    by_attribute || has_humanitarian_sector(activity, major) || by_transaction_sector
}

/// Whether any direct `sector` child carries a humanitarian DAC code
fn has_humanitarian_sector(el: &Element, major: MajorVersion) -> bool {
    el.children_named("sector").any(|sector| {
        let code = match sector.attr("code") {
            Some(code) => code,
            None => return false,
        };
        match sector.attr("vocabulary") {
            None => HUMANITARIAN_DAC_5.contains(&code),
            Some(v) if v == major.dac_5() => HUMANITARIAN_DAC_5.contains(&code),
            Some(v) if v == major.dac_3() => HUMANITARIAN_DAC_3.contains(&code),
            Some(_) => false,
        }
    })
}

/// Year a budget belongs to: its period start, else its period end
fn budget_year(budget: &Element) -> Option<i32> {
    ["period-start/@iso-date", "period-end/@iso-date"]
        .iter()
        .find_map(|path| budget.value(path).and_then(|d| iso_date(&d)))
        .and_then(|d| d[..4].parse().ok())
}

/// Date of a transaction: transaction-date/@iso-date, else value/@value-date
fn transaction_date(transaction: &Element) -> Option<String> {
    transaction
        .value("transaction-date/@iso-date")
        .and_then(|d| iso_date(&d))
        .or_else(|| {
            transaction
                .value("value/@value-date")
                .and_then(|d| iso_date(&d))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::document::parse;
    use crate::stats::{DocumentKey, DocumentKind, MetricValue};

    fn reference() -> ReferenceData {
        ReferenceData::new()
            .with_codelist("Version", &["1.01", "2.01", "2.03"])
            .with_codelist("OrganisationRegistrationAgency", &["NP-COA", "XI-IATI"])
            .with_codelist("CRSChannelCode", &["47122"])
            .with_codelist("Currency", &["GBP", "USD"])
            .with_mapping("iati-activity/sector/@code", "Sector")
            .with_rate("GBP", 2023, 0.5)
    }

    fn tally(xml: &str) -> MetricRecord {
        let root = parse(xml.as_bytes()).unwrap();
        let reference = reference();
        let version = resolve_version(root.attr("version"), &reference);
        let mut tally = ActivityTally::new();
        for activity in root.children_named("iati-activity") {
            tally.add(activity, &version, &reference);
        }
        let mut record = MetricRecord::new(&DocumentKey::new("p", "f.xml"), DocumentKind::Activity);
        tally.write_into(&mut record);
        record
    }

    fn humanitarian(xml: &str) -> i64 {
        tally(xml).get("humanitarian").unwrap().as_count().unwrap()
    }

    fn count_at(record: &MetricRecord, metric: &str, key: &str) -> i64 {
        record.get(metric).unwrap().as_map().unwrap()[key]
            .as_count()
            .unwrap()
    }

    #[test]
    fn test_version_resolution() {
        let reference = reference();
        assert_eq!(resolve_version(Some("2.03"), &reference), "2.03");
        assert_eq!(resolve_version(Some("7.7"), &reference), DEFAULT_VERSION);
        assert_eq!(resolve_version(None, &reference), DEFAULT_VERSION);
        assert_eq!(MajorVersion::of("2.03"), MajorVersion::V2);
        assert_eq!(MajorVersion::of("1.05"), MajorVersion::V1);
    }

    #[test]
    fn test_transactions_and_participating_orgs() {
        let record = tally(
            r#"<iati-activities version="2.03">
                <iati-activity>
                    <participating-org ref="BB-BBB-123456789" role="1" />
                    <participating-org ref="AA-AAA-123456789" role="3" />
                    <participating-org ref="AA-AAA-123456789" role="4" />
                    <transaction><provider-org ref="BB-BBB-123456789" /></transaction>
                    <transaction><provider-org ref="BB-BBB-123456789" /></transaction>
                </iati-activity>
            </iati-activities>"#,
        );
        assert_eq!(record.get("transaction_total"), Some(&MetricValue::Count(2)));
        // Counted once per activity, not once per role
        assert_eq!(count_at(&record, "participating_orgs", "AA-AAA-123456789"), 1);
        assert_eq!(
            record.get("participating_orgs_by_role").unwrap().as_map().unwrap()["4"],
            MetricValue::counts([("AA-AAA-123456789", 1)])
        );
    }

    #[test]
    fn test_identifiers_and_orgs() {
        let record = tally(
            r#"<iati-activities version="2.03">
                <iati-activity hierarchy="2">
                    <iati-identifier>GB-1-001</iati-identifier>
                    <reporting-org ref="GB-1" secondary-reporter="1"/>
                </iati-activity>
                <iati-activity>
                    <iati-identifier>GB-1-001</iati-identifier>
                </iati-activity>
            </iati-activities>"#,
        );
        assert_eq!(record.get("activities"), Some(&MetricValue::Count(2)));
        assert_eq!(count_at(&record, "iati_identifiers", "GB-1-001"), 2);
        assert_eq!(count_at(&record, "reporting_orgs", "GB-1"), 1);
        assert_eq!(count_at(&record, "reporting_orgs", "null"), 1);
        assert_eq!(count_at(&record, "hierarchies", "2"), 1);
        assert_eq!(count_at(&record, "hierarchies", "1"), 1);
        assert_eq!(record.get("secondary_reported"), Some(&MetricValue::Flag(true)));
        assert_eq!(record.get("reporting_org_ref"), Some(&MetricValue::from("GB-1")));
    }

    #[test]
    fn test_transaction_sums_and_usd() {
        let record = tally(
            r#"<iati-activities version="2.03">
                <iati-activity default-currency="GBP">
                    <iati-identifier>GB-1-001</iati-identifier>
                    <transaction>
                        <transaction-type code="2"/>
                        <transaction-date iso-date="2023-02-01"/>
                        <value>100</value>
                    </transaction>
                    <transaction>
                        <transaction-type code="3"/>
                        <value currency="GBP" value-date="2023-03-15">50</value>
                    </transaction>
                    <transaction>
                        <transaction-type code="4"/>
                        <value currency="USD" value-date="2023-03-20">7</value>
                    </transaction>
                    <transaction>
                        <transaction-type code="11"/>
                        <value value-date="2023-03-20">999</value>
                    </transaction>
                </iati-activity>
            </iati-activities>"#,
        );

        let sums = record.get("sum_transactions_by_type_by_year").unwrap();
        let commitment = &sums.as_map().unwrap()["2"].as_map().unwrap()["GBP"];
        assert_eq!(commitment.as_map().unwrap()["2023"], MetricValue::Amount(100.0));
        assert!(!sums.as_map().unwrap().contains_key("11"));

        let usd = record.get("sum_transactions_by_type_by_year_usd").unwrap();
        assert_eq!(
            usd.as_map().unwrap()["3"].as_map().unwrap()["2023"],
            MetricValue::Amount(100.0)
        );
        // No USD rate loaded for USD in the fixture
        assert_eq!(
            usd.as_map().unwrap()["4"].as_map().unwrap()["2023"],
            MetricValue::Amount(0.0)
        );

        // 100 GBP commitment + 50 GBP disbursement at 0.5 GBP/USD
        let by_activity = record
            .get("sum_commitments_and_disbursements_by_activity_id_usd")
            .unwrap();
        assert_eq!(
            by_activity.as_map().unwrap()["GB-1-001"],
            MetricValue::Amount(300.0)
        );

        assert_eq!(count_at(&record, "currencies", "GBP"), 1);
        assert_eq!(count_at(&record, "currencies", "USD"), 1);
        assert_eq!(count_at(&record, "transaction_months_with_year", "2023-03"), 3);
        assert_eq!(
            record.get("latest_transaction_date"),
            Some(&MetricValue::from("2023-03-20"))
        );
    }

    #[test]
    fn test_provider_activity_id_excludes_own() {
        let record = tally(
            r#"<iati-activities version="2.03">
                <iati-activity>
                    <iati-identifier>GB-1-001</iati-identifier>
                    <transaction><provider-org provider-activity-id="GB-1-001"/></transaction>
                    <transaction><provider-org provider-activity-id="US-2-777"/></transaction>
                </iati-activity>
            </iati-activities>"#,
        );
        let ids = record.get("provider_activity_id").unwrap().as_map().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids["US-2-777"], MetricValue::Count(1));
    }

    #[test]
    fn test_v1_codes() {
        let record = tally(
            r#"<iati-activities version="1.01">
                <iati-activity default-currency="GBP">
                    <transaction>
                        <transaction-type code="C"/>
                        <value value-date="2023-01-01">10</value>
                    </transaction>
                    <transaction>
                        <transaction-type code="2"/>
                        <value value-date="2023-01-01">10</value>
                    </transaction>
                </iati-activity>
            </iati-activities>"#,
        );
        let sums = record.get("sum_transactions_by_type_by_year").unwrap();
        let types: Vec<_> = sums.as_map().unwrap().keys().cloned().collect();
        assert_eq!(types, vec!["C".to_string()]);
    }

    #[test]
    fn test_dates_languages_humanitarian_codelists() {
        let record = tally(
            r#"<iati-activities version="2.03">
                <iati-activity xml:lang="en" humanitarian="1">
                    <title><narrative xml:lang="fr">Eau</narrative></title>
                    <activity-date type="1" iso-date="2020-01-01"/>
                    <activity-date type="2" iso-date="2019-06-01"/>
                    <activity-date type="3" iso-date="not a date"/>
                    <sector code="11110"/>
                    <sector code="99999"/>
                </iati-activity>
                <iati-activity>
                    <transaction humanitarian="true"/>
                </iati-activity>
                <iati-activity/>
            </iati-activities>"#,
        );

        assert_eq!(record.get("humanitarian"), Some(&MetricValue::Count(2)));
        assert_eq!(
            record.get("earliest_activity_date"),
            Some(&MetricValue::from("2019-06-01"))
        );
        let dates = record.get("activity_dates").unwrap().as_map().unwrap();
        assert_eq!(dates["3"], MetricValue::counts([("null", 1)]));

        assert_eq!(
            record.get("narrative_languages"),
            Some(&MetricValue::Set(
                ["en".to_string(), "fr".to_string()].into_iter().collect()
            ))
        );

        let codes = record.get("codelist_values").unwrap().as_map().unwrap();
        assert_eq!(
            codes["iati-activity/sector/@code"],
            MetricValue::counts([("11110", 1), ("99999", 1)])
        );

        assert_eq!(count_at(&record, "elements", "iati-activity/sector"), 1);
        assert_eq!(count_at(&record, "elements_total", "iati-activity/sector"), 2);
        assert_eq!(count_at(&record, "elements", "iati-activity"), 3);
    }

    #[test]
    fn test_activity_humanitarian_false_vetoes_transactions() {
        assert_eq!(
            humanitarian(
                r#"<iati-activities version="2.03">
                    <iati-activity humanitarian="0">
                        <transaction humanitarian="1"/>
                    </iati-activity>
                    <iati-activity humanitarian="false">
                        <sector code="72010"/>
                    </iati-activity>
                </iati-activities>"#
            ),
            0
        );
    }

    #[test]
    fn test_humanitarian_attribute_needs_supporting_version() {
        let xml = |version: &str| {
            format!(
                r#"<iati-activities version="{}">
                    <iati-activity humanitarian="1"/>
                    <iati-activity><transaction humanitarian="true"/></iati-activity>
                </iati-activities>"#,
                version
            )
        };
        assert_eq!(humanitarian(&xml("2.03")), 2);
        assert_eq!(humanitarian(&xml("2.01")), 0);
    }

    #[test]
    fn test_humanitarian_by_dac_sector() {
        let record = tally(
            r#"<iati-activities version="2.01">
                <iati-activity><sector code="72010"/></iati-activity>
                <iati-activity><sector vocabulary="1" code="74020"/></iati-activity>
                <iati-activity><sector vocabulary="2" code="730"/></iati-activity>
                <iati-activity><sector vocabulary="1" code="730"/></iati-activity>
                <iati-activity><sector vocabulary="99" code="72010"/></iati-activity>
                <iati-activity><sector code="11110"/></iati-activity>
                <iati-activity>
                    <transaction><sector code="73010"/></transaction>
                </iati-activity>
                <iati-activity>
                    <transaction humanitarian="0"><sector code="73010"/></transaction>
                </iati-activity>
            </iati-activities>"#,
        );
        assert_eq!(record.get("humanitarian"), Some(&MetricValue::Count(4)));

        // Version 1 uses named vocabularies and ignores transaction sectors
        assert_eq!(
            humanitarian(
                r#"<iati-activities version="1.01">
                    <iati-activity><sector vocabulary="DAC-3" code="720"/></iati-activity>
                    <iati-activity><sector vocabulary="2" code="720"/></iati-activity>
                    <iati-activity>
                        <transaction><sector code="72010"/></transaction>
                    </iati-activity>
                </iati-activities>"#
            ),
            1
        );
    }

    #[test]
    fn test_budgets_by_type_by_year() {
        let record = tally(
            r#"<iati-activities version="2.03">
                <iati-activity default-currency="GBP">
                    <budget type="1">
                        <period-start iso-date="2023-01-01"/>
                        <period-end iso-date="2023-12-31"/>
                        <value>1,000</value>
                    </budget>
                    <budget type="1">
                        <period-start iso-date="2023-06-01"/>
                        <value currency="USD">40</value>
                    </budget>
                    <budget type="2">
                        <period-end iso-date="2024-03-31"/>
                        <value>20</value>
                    </budget>
                    <budget type="1">
                        <value>5</value>
                    </budget>
                </iati-activity>
            </iati-activities>"#,
        );

        let counts = record.get("count_budgets_by_type_by_year").unwrap();
        assert_eq!(counts.as_map().unwrap()["1"], MetricValue::counts([("2023", 2)]));
        assert_eq!(counts.as_map().unwrap()["2"], MetricValue::counts([("2024", 1)]));

        let sums = record.get("sum_budgets_by_type_by_year").unwrap().as_map().unwrap();
        let original = sums["1"].as_map().unwrap();
        assert_eq!(
            original["GBP"].as_map().unwrap()["2023"],
            MetricValue::Amount(1000.0)
        );
        assert_eq!(
            original["USD"].as_map().unwrap()["2023"],
            MetricValue::Amount(40.0)
        );

        // 1000 GBP at 0.5 GBP/USD; no USD rate in the fixture
        let usd = record.get("sum_budgets_by_type_by_year_usd").unwrap();
        assert_eq!(
            usd.as_map().unwrap()["1"].as_map().unwrap()["2023"],
            MetricValue::Amount(2000.0)
        );
    }

    #[test]
    fn test_org_reference_stats() {
        let record = tally(
            r#"<iati-activities version="2.03">
                <iati-activity>
                    <reporting-org ref="AA-AAA-123456789"/>
                    <participating-org ref="NP-COA-370" role="1"/>
                    <participating-org ref="BB-BBB-123456789" role="1"/>
                    <participating-org ref="AA-AAA-123456789" role="1"/>
                    <participating-org ref="" role="1"/>
                    <participating-org role="1"/>
                    <participating-org ref="XI-IATI-1002" role="4"/>
                    <transaction>
                        <provider-org ref="NP-COA-370"/>
                        <receiver-org ref="AA-AAA-123456789"/>
                    </transaction>
                    <transaction>
                        <provider-org ref="47122"/>
                    </transaction>
                    <transaction>
                        <provider-org ref="NP-COA-12"/>
                    </transaction>
                </iati-activity>
            </iati-activities>"#,
        );

        let funding = record.get("funding_org_transaction_stats").unwrap();
        assert_eq!(
            funding,
            &MetricValue::counts([
                ("total_orgs", 5),
                ("total_refs", 4),
                ("total_full_refs", 3),
                ("total_notself_refs", 2),
                ("total_valid_refs", 1),
            ])
        );
        assert_eq!(
            record.get("funding_org_valid_prefixes"),
            Some(&MetricValue::counts([("NP-COA", 1)]))
        );
        assert_eq!(
            record.get("implementing_org_valid_prefixes"),
            Some(&MetricValue::counts([("XI-IATI", 1)]))
        );

        assert_eq!(count_at(&record, "provider_org_transaction_stats", "total_orgs"), 3);
        assert_eq!(
            record.get("provider_org_valid_prefixes"),
            Some(&MetricValue::counts([("47122", 1), ("NP-COA", 2)]))
        );
        // The only receiver is the reporting organisation itself
        assert_eq!(count_at(&record, "receiver_org_transaction_stats", "total_full_refs"), 1);
        assert_eq!(count_at(&record, "receiver_org_transaction_stats", "total_notself_refs"), 0);

        // Roles without organisations still report every statistic
        assert_eq!(count_at(&record, "accountable_org_transaction_stats", "total_orgs"), 0);
        assert_eq!(
            record.get("accountable_org_valid_prefixes"),
            Some(&MetricValue::empty_map())
        );
    }
}
