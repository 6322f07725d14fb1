//! Reference Data
//!
//! Read-only inputs prepared by an external fetch step:
//!
//! - `codelists/<Name>.json`: allowed codes, `{"data": [{"code": "..."}]}`
//! - `codelist_mapping.json`: element paths whose values are tallied per codelist
//! - `exchange_rates.csv`: `Currency,Rate,Date` rows for USD conversion
//!
//! Loaded once per batch and shared by every extraction worker. Missing or
//! unreadable reference data is fatal for the whole run.

use crate::stats::{StatsError, StatsResult};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Codelists every run needs
pub const REQUIRED_CODELISTS: &[&str] = &["Version", "Currency"];

/// Codelists whose codes prefix valid organisation identifiers, in lookup order
pub const ORG_PREFIX_CODELISTS: &[&str] = &["OrganisationRegistrationAgency", "CRSChannelCode"];

/// One element path whose values belong to a codelist
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodelistMapping {
    /// Slash-separated path from the document item, ending in `@attribute`
    /// (e.g. `iati-activity/sector/@code`)
    pub path: String,
    pub codelist: String,
}

#[derive(Debug, Deserialize)]
struct CodelistFile {
    data: Vec<CodelistEntry>,
}

#[derive(Debug, Deserialize)]
struct CodelistEntry {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RateRow {
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Rate")]
    rate: f64,
    #[serde(rename = "Date")]
    date: String,
}

/// Codelists, codelist mappings and exchange rates
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    codelists: HashMap<String, HashSet<String>>,
    mappings: Vec<CodelistMapping>,
    /// currency → year → units per USD
    rates: HashMap<String, BTreeMap<i32, f64>>,
}

impl ReferenceData {
    /// Empty reference data, extended with the `with_*` builders
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every reference file from the helpers directory
    pub fn load(helpers_dir: &Path) -> StatsResult<Self> {
        let mut data = Self::new();

        let codelist_dir = helpers_dir.join("codelists");
        let entries = std::fs::read_dir(&codelist_dir)
            .map_err(|e| reference_error(&codelist_dir, e))?;

        for entry in entries {
            let path = entry.map_err(|e| reference_error(&codelist_dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            let content = std::fs::read(&path).map_err(|e| reference_error(&path, e))?;
            let file: CodelistFile =
                serde_json::from_slice(&content).map_err(|e| reference_error(&path, e))?;
            data.codelists
                .insert(name, file.data.into_iter().map(|c| c.code).collect());
        }

        for name in REQUIRED_CODELISTS {
            if !data.codelists.contains_key(*name) {
                return Err(StatsError::ReferenceData {
                    path: codelist_dir.join(format!("{}.json", name)),
                    reason: "required codelist missing".to_string(),
                });
            }
        }

        let mapping_path = helpers_dir.join("codelist_mapping.json");
        let content =
            std::fs::read(&mapping_path).map_err(|e| reference_error(&mapping_path, e))?;
        data.mappings =
            serde_json::from_slice(&content).map_err(|e| reference_error(&mapping_path, e))?;

        let rates_path = helpers_dir.join("exchange_rates.csv");
        data.rates = load_rates(&rates_path)?;

        tracing::info!(
            codelists = data.codelists.len(),
            mappings = data.mappings.len(),
            currencies = data.rates.len(),
            "Loaded reference data"
        );

        Ok(data)
    }

    /// Builder method: add a codelist
    pub fn with_codelist(mut self, name: &str, codes: &[&str]) -> Self {
        self.codelists.insert(
            name.to_string(),
            codes.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Builder method: add a codelist mapping
    pub fn with_mapping(mut self, path: &str, codelist: &str) -> Self {
        self.mappings.push(CodelistMapping {
            path: path.to_string(),
            codelist: codelist.to_string(),
        });
        self
    }

    /// Builder method: add an exchange rate (units of `currency` per USD)
    pub fn with_rate(mut self, currency: &str, year: i32, rate: f64) -> Self {
        self.rates
            .entry(currency.to_string())
            .or_default()
            .insert(year, rate);
        self
    }

    pub fn codelist(&self, name: &str) -> Option<&HashSet<String>> {
        self.codelists.get(name)
    }

    /// Whether `code` is listed in the codelist `name`
    pub fn in_codelist(&self, name: &str, code: &str) -> bool {
        self.codelists
            .get(name)
            .map(|codes| codes.contains(code))
            .unwrap_or(false)
    }

    /// Registered prefix of an organisation identifier
    ///
    /// Registration agencies are tried before CRS channel codes. Within one
    /// codelist the longest matching code wins.
    pub fn org_prefix(&self, org_ref: &str) -> Option<&str> {
        ORG_PREFIX_CODELISTS.iter().find_map(|name| {
            self.codelists
                .get(*name)?
                .iter()
                .filter(|code| !code.is_empty() && org_ref.starts_with(code.as_str()))
                .max_by_key(|code| code.len())
                .map(String::as_str)
        })
    }

    pub fn mappings(&self) -> &[CodelistMapping] {
        &self.mappings
    }

    /// Convert an amount to USD for the given year
    ///
    /// Unknown currencies, unknown years and zero rates convert to zero.
    pub fn usd_value(&self, currency: &str, value: f64, year: i32) -> f64 {
        match self.rates.get(currency).and_then(|years| years.get(&year)) {
            Some(rate) if *rate != 0.0 => value / rate,
            _ => 0.0,
        }
    }
}

fn reference_error(path: &Path, err: impl std::fmt::Display) -> StatsError {
    StatsError::ReferenceData {
        path: PathBuf::from(path),
        reason: err.to_string(),
    }
}

fn load_rates(path: &Path) -> StatsResult<HashMap<String, BTreeMap<i32, f64>>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| reference_error(path, e))?;
    let mut rates: HashMap<String, BTreeMap<i32, f64>> = HashMap::new();

    for (line, row) in reader.deserialize::<RateRow>().enumerate() {
        let row = row.map_err(|e| reference_error(path, e))?;
        let year = row
            .date
            .get(..4)
            .and_then(|y| y.parse::<i32>().ok())
            .ok_or_else(|| {
                reference_error(path, format!("line {}: bad date {:?}", line + 2, row.date))
            })?;
        rates.entry(row.currency).or_default().insert(year, row.rate);
    }

    Ok(rates)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Write a minimal, valid helpers directory
    pub(crate) fn write_helpers(dir: &Path) {
        let codelists = dir.join("codelists");
        std::fs::create_dir_all(&codelists).unwrap();
        std::fs::write(
            codelists.join("Version.json"),
            r#"{"data": [{"code": "1.01"}, {"code": "1.05"}, {"code": "2.01"}, {"code": "2.03"}]}"#,
        )
        .unwrap();
        std::fs::write(
            codelists.join("Currency.json"),
            r#"{"data": [{"code": "USD"}, {"code": "GBP"}, {"code": "EUR"}]}"#,
        )
        .unwrap();
        std::fs::write(
            codelists.join("Sector.json"),
            r#"{"data": [{"code": "11110"}, {"code": "12220"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("codelist_mapping.json"),
            r#"[{"path": "iati-activity/sector/@code", "codelist": "Sector"},
                {"path": "iati-activity/transaction/value/@currency", "codelist": "Currency"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("exchange_rates.csv"),
            "Currency,Rate,Date\nGBP,0.5,2023-06-30\nEUR,0.8,2023-06-30\nUSD,1,2023-06-30\n",
        )
        .unwrap();
    }

    #[test]
    fn test_load_reference_data() {
        let dir = tempdir().unwrap();
        write_helpers(dir.path());

        let data = ReferenceData::load(dir.path()).unwrap();
        assert!(data.in_codelist("Version", "2.03"));
        assert!(!data.in_codelist("Version", "9.99"));
        assert_eq!(data.mappings().len(), 2);
        assert_eq!(data.usd_value("GBP", 10.0, 2023), 20.0);
    }

    #[test]
    fn test_missing_required_codelist_is_fatal() {
        let dir = tempdir().unwrap();
        write_helpers(dir.path());
        std::fs::remove_file(dir.path().join("codelists").join("Currency.json")).unwrap();

        let err = ReferenceData::load(dir.path()).unwrap_err();
        assert!(matches!(err, StatsError::ReferenceData { .. }));
    }

    #[test]
    fn test_missing_rates_is_fatal() {
        let dir = tempdir().unwrap();
        write_helpers(dir.path());
        std::fs::remove_file(dir.path().join("exchange_rates.csv")).unwrap();

        assert!(ReferenceData::load(dir.path()).is_err());
    }

    #[test]
    fn test_usd_value_unknown_inputs() {
        let data = ReferenceData::new()
            .with_rate("GBP", 2023, 0.5)
            .with_rate("XXX", 2023, 0.0);

        assert_eq!(data.usd_value("GBP", 1.0, 2023), 2.0);
        assert_eq!(data.usd_value("GBP", 1.0, 1999), 0.0);
        assert_eq!(data.usd_value("JPY", 1.0, 2023), 0.0);
        assert_eq!(data.usd_value("XXX", 1.0, 2023), 0.0);
    }

    #[test]
    fn test_org_prefix_lookup() {
        let data = ReferenceData::new()
            .with_codelist("OrganisationRegistrationAgency", &["NP-COA", "XI-IATI", "XI"])
            .with_codelist("CRSChannelCode", &["47122", "XI-IATI-1"]);

        assert_eq!(data.org_prefix("NP-COA-370"), Some("NP-COA"));
        assert_eq!(data.org_prefix("XI-IATI-1002"), Some("XI-IATI"));
        assert_eq!(data.org_prefix("47122"), Some("47122"));
        assert_eq!(data.org_prefix("AA-AAA-123456789"), None);
        assert_eq!(ReferenceData::new().org_prefix("NP-COA-370"), None);
    }
}
