//! Organisation metrics, calculated on each `iati-organisation`

use crate::extract::count_elements;
use crate::extract::document::Element;
use crate::stats::MetricRecord;
use std::collections::BTreeMap;

type Counts = BTreeMap<String, i64>;

#[derive(Debug, Default)]
pub struct OrganisationTally {
    organisations: i64,
    elements: Counts,
    elements_total: Counts,
    reporting_orgs: Counts,
    first_reporting_org: Option<String>,
}

impl OrganisationTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, organisation: &Element) {
        self.organisations += 1;

        let mut presence = Counts::new();
        count_elements(
            organisation,
            "iati-organisation",
            &mut presence,
            &mut self.elements_total,
        );
        for path in presence.into_keys() {
            *self.elements.entry(path).or_insert(0) += 1;
        }

        let reference = organisation
            .value("reporting-org/@ref")
            .unwrap_or_else(|| "null".to_string());
        if self.first_reporting_org.is_none() {
            self.first_reporting_org = Some(reference.clone());
        }
        *self.reporting_orgs.entry(reference).or_insert(0) += 1;
    }

    pub fn write_into(self, record: &mut MetricRecord) {
        record.set("organisations", self.organisations);
        record.set("elements", self.elements);
        record.set("elements_total", self.elements_total);
        record.set("reporting_orgs", self.reporting_orgs);
        if let Some(reporting_org) = self.first_reporting_org {
            record.set("reporting_org_ref", reporting_org);
        }
    }
}
