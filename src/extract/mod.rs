//! Per-document extraction
//!
//! Turns one source document into one [`MetricRecord`]:
//!
//! ```text
//! bytes ──parse──▶ Element tree ──root──▶ activity / organisation tally
//!                                            │
//!                      file-level metrics ───┴──▶ MetricRecord
//! ```
//!
//! Extraction is a pure function of the document bytes and the reference
//! data. [`run_loop`] drives it over a whole data directory with a pool of
//! workers.

pub mod activity;
pub mod document;
pub mod organisation;
mod pool;

pub use activity::{resolve_version, MajorVersion, DEFAULT_VERSION};
pub use document::{parse, Element};
pub use pool::{discover_documents, run_loop, LoopOptions, LoopSummary};

use crate::reference::ReferenceData;
use crate::stats::{DocumentKey, DocumentKind, MetricRecord, StatsError, StatsResult};
use activity::ActivityTally;
use organisation::OrganisationTally;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

const MB: usize = 1024 * 1024;

/// Extracts metric records, sharing one set of reference data
#[derive(Debug, Clone)]
pub struct Extractor {
    reference: Arc<ReferenceData>,
}

impl Extractor {
    pub fn new(reference: Arc<ReferenceData>) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    /// Extract every metric of one document
    ///
    /// Malformed, badly encoded and unsupported documents fail with a
    /// document-local error (see [`StatsError::is_document_local`]).
    pub fn extract(&self, key: &DocumentKey, bytes: &[u8]) -> StatsResult<MetricRecord> {
        let root = document::parse(bytes)?;
        let kind = DocumentKind::from_root(&root.name)
            .ok_or_else(|| StatsError::UnsupportedDocument(format!("root <{}>", root.name)))?;

        let mut record = MetricRecord::new(key, kind);
        let declared = root.attr("version");

        record.set("file_size", bytes.len() as i64);
        record.set("file_size_bins", single_count(file_size_bin(bytes.len())));
        record.set("versions", single_count(declared.unwrap_or("null")));

        match kind {
            DocumentKind::Activity => {
                let version = resolve_version(declared, &self.reference);

                let mut tally = ActivityTally::new();
                for activity in root.children_named("iati-activity") {
                    tally.add(activity, &version, &self.reference);
                }

                let mismatch = match declared {
                    Some(declared) => tally.activity_versions().iter().any(|v| v != declared),
                    None => false,
                };
                record.set(
                    "version_mismatch",
                    single_count(if mismatch { "true" } else { "false" }),
                );
                record.set("activity_files", 1i64);
                tally.write_into(&mut record);
            }
            DocumentKind::Organisation => {
                let mut tally = OrganisationTally::new();
                for organisation in root.children_named("iati-organisation") {
                    tally.add(organisation);
                }
                record.set("organisation_files", 1i64);
                tally.write_into(&mut record);
            }
        }

        tracing::trace!(document = %key, kind = %kind, metrics = record.metrics.len(), "Extracted");
        Ok(record)
    }
}

fn single_count(key: &str) -> BTreeMap<String, i64> {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), 1);
    map
}

fn file_size_bin(size: usize) -> &'static str {
    match size {
        s if s < MB => "<1MB",
        s if s < 5 * MB => "1-5MB",
        s if s < 10 * MB => "5-10MB",
        s if s < 20 * MB => "10-20MB",
        _ => ">20MB",
    }
}

/// Tally element and attribute paths below `element`
///
/// `presence` gets each path once, `total` gets every occurrence. Attributes
/// appear as `path/@name` and are skipped when empty.
pub(crate) fn count_elements(
    element: &Element,
    path: &str,
    presence: &mut BTreeMap<String, i64>,
    total: &mut BTreeMap<String, i64>,
) {
    presence.insert(path.to_string(), 1);
    *total.entry(path.to_string()).or_insert(0) += 1;

    for (name, value) in &element.attrs {
        if value.is_empty() {
            continue;
        }
        let attr_path = format!("{}/@{}", path, name);
        presence.insert(attr_path.clone(), 1);
        *total.entry(attr_path).or_insert(0) += 1;
    }

    for child in &element.children {
        count_elements(child, &format!("{}/{}", path, child.name), presence, total);
    }
}

/// The `YYYY-MM-DD` prefix of an ISO date, if the value starts with one
pub(crate) fn iso_date(value: &str) -> Option<String> {
    static ISO_DATE: OnceLock<Regex> = OnceLock::new();
    let re = ISO_DATE
        .get_or_init(|| Regex::new(r"^\s*(\d{4}-\d{2}-\d{2})").expect("valid date pattern"));
    re.captures(value).map(|c| c[1].to_string())
}
