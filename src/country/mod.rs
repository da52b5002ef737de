use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use thiserror::Error;

/// Placeholder the analytics APIs use when a visit's country is unknown.
pub const UNKNOWN_ALPHA2: &str = "ZZ";

/// Three-letter counterpart of [`UNKNOWN_ALPHA2`].
pub const UNKNOWN_ALPHA3: &str = "ZZZ";

/// Dimension value GA4 reports for visits without a resolvable country.
const NOT_SET: &str = "(not set)";

#[derive(Debug, Error)]
pub enum CountryError {
    #[error("unknown country code: {0:?}")]
    UnknownCode(String),

    #[error("malformed country table: {0}")]
    Table(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct CountryRecord {
    alpha2: String,
    alpha3: String,
    name: String,
}

/// ISO 3166-1 reference table: alpha-2 to alpha-3 codes and alpha-3 to display names.
#[derive(Debug, Clone)]
pub struct CountryRef {
    alpha3_by_alpha2: HashMap<String, String>,
    names: BTreeMap<String, String>,
}

impl CountryRef {
    /// Load the table compiled into the binary.
    pub fn embedded() -> Result<Self, CountryError> {
        Self::from_reader(include_str!("iso3166.csv").as_bytes())
    }

    /// Load a table from CSV with `alpha2,alpha3,name` columns.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CountryError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut alpha3_by_alpha2 = HashMap::new();
        let mut names = BTreeMap::new();

        for record in rdr.deserialize() {
            let record: CountryRecord = record?;
            let alpha2 = record.alpha2.trim().to_uppercase();
            let alpha3 = record.alpha3.trim().to_uppercase();
            alpha3_by_alpha2.insert(alpha2, alpha3.clone());
            names.insert(alpha3, record.name);
        }

        Ok(CountryRef {
            alpha3_by_alpha2,
            names,
        })
    }

    /// Map a two-letter code to its three-letter equivalent.
    ///
    /// `ZZ` always resolves to `ZZZ`. Any other code missing from the table is an error;
    /// there is no fallback.
    pub fn resolve(&self, code: &str) -> Result<String, CountryError> {
        let key = code.trim().to_uppercase();
        if key == UNKNOWN_ALPHA2 {
            return Ok(UNKNOWN_ALPHA3.to_string());
        }
        self.alpha3_by_alpha2
            .get(&key)
            .cloned()
            .ok_or_else(|| CountryError::UnknownCode(code.to_string()))
    }

    /// Display name for a three-letter code
    pub fn name(&self, alpha3: &str) -> Option<&str> {
        self.names.get(alpha3).map(String::as_str)
    }

    /// All three-letter codes in the table, sorted
    pub fn alpha3_codes(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Normalize a raw country dimension value from an API response.
///
/// Blank values and GA4's `(not set)` become the unknown sentinel.
pub fn normalize_dimension(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(NOT_SET) {
        UNKNOWN_ALPHA2.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_table_loads() {
        let countries = CountryRef::embedded().unwrap();
        assert!(countries.len() >= 249);
        assert_eq!(countries.name("FRA"), Some("France"));
        assert_eq!(countries.name("KOR"), Some("Korea, Republic of"));
    }

    #[test]
    fn test_unknown_sentinel_resolves() {
        let countries = CountryRef::embedded().unwrap();
        assert_eq!(countries.resolve("ZZ").unwrap(), "ZZZ");
        assert_eq!(countries.resolve("zz").unwrap(), "ZZZ");
    }

    #[test]
    fn test_resolve_known_codes() {
        let countries = CountryRef::embedded().unwrap();
        assert_eq!(countries.resolve("FR").unwrap(), "FRA");
        assert_eq!(countries.resolve("DE").unwrap(), "DEU");
        assert_eq!(countries.resolve("us").unwrap(), "USA");
        assert_eq!(countries.resolve(" GB ").unwrap(), "GBR");
    }

    #[test]
    fn test_resolve_unmapped_code_fails() {
        let countries = CountryRef::embedded().unwrap();
        let err = countries.resolve("QQ").unwrap_err();
        assert!(matches!(err, CountryError::UnknownCode(ref c) if c == "QQ"));
        assert!(countries.resolve("").is_err());
        // Only two-letter codes are looked up
        assert!(countries.resolve("FRA").is_err());
    }

    #[test]
    fn test_resolve_is_stable_against_table() {
        let countries = CountryRef::embedded().unwrap();
        let table = "alpha2,alpha3,name\nFR,FRA,France\nDE,DEU,Germany\n";
        let small = CountryRef::from_reader(table.as_bytes()).unwrap();
        for code in ["FR", "DE"] {
            assert_eq!(small.resolve(code).unwrap(), countries.resolve(code).unwrap());
        }
        assert!(small.resolve("US").is_err());
    }

    #[test]
    fn test_normalize_dimension() {
        assert_eq!(normalize_dimension("(not set)"), "ZZ");
        assert_eq!(normalize_dimension("(NOT SET)"), "ZZ");
        assert_eq!(normalize_dimension("  "), "ZZ");
        assert_eq!(normalize_dimension("FR"), "FR");
    }

    #[test]
    fn test_alpha3_codes_sorted() {
        let countries = CountryRef::embedded().unwrap();
        let codes: Vec<&str> = countries.alpha3_codes().collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);
        assert!(!codes.contains(&UNKNOWN_ALPHA3));
    }
}
