use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::ops::AddAssign;
use std::path::Path;
use thiserror::Error;

use crate::analytics::MetricRow;
use crate::country::{CountryError, CountryRef};

const INDEX_COLUMN: &str = "iso3";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required column {0:?}")]
    MissingColumn(&'static str),

    #[error("line {line}: bad value {value:?} in column {column:?}")]
    BadValue {
        line: u64,
        column: String,
        value: String,
    },
}

/// One of the per-country counts a report carries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Sessions,
    Users,
    #[default]
    Pageviews,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Sessions, Metric::Users, Metric::Pageviews];

    /// CSV column name
    pub fn column(&self) -> &'static str {
        match self {
            Metric::Sessions => "sessions",
            Metric::Users => "users",
            Metric::Pageviews => "pageviews",
        }
    }

    /// Title used on maps and in mail
    pub fn title(&self) -> &'static str {
        match self {
            Metric::Sessions => "Sessions",
            Metric::Users => "Users",
            Metric::Pageviews => "Views",
        }
    }

    fn from_column(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.strip_prefix("ga:").unwrap_or(name);
        Metric::ALL
            .into_iter()
            .find(|m| m.column().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Summed counts for one country
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub sessions: u64,
    pub users: u64,
    pub pageviews: u64,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Sessions => self.sessions,
            Metric::Users => self.users,
            Metric::Pageviews => self.pageviews,
        }
    }

    fn set(&mut self, metric: Metric, value: u64) {
        match metric {
            Metric::Sessions => self.sessions = value,
            Metric::Users => self.users = value,
            Metric::Pageviews => self.pageviews = value,
        }
    }
}

impl AddAssign for Metrics {
    fn add_assign(&mut self, rhs: Self) {
        self.sessions += rhs.sessions;
        self.users += rhs.users;
        self.pageviews += rhs.pageviews;
    }
}

impl From<&MetricRow> for Metrics {
    fn from(row: &MetricRow) -> Self {
        Metrics {
            sessions: row.sessions,
            users: row.users,
            pageviews: row.pageviews,
        }
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    iso3: &'a str,
    sessions: u64,
    users: u64,
    pageviews: u64,
}

/// Per-country totals keyed by three-letter code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateTable {
    rows: BTreeMap<String, Metrics>,
}

impl AggregateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add metrics into the running total for `iso3`, starting from zero
    pub fn add(&mut self, iso3: impl Into<String>, metrics: Metrics) {
        *self.rows.entry(iso3.into()).or_default() += metrics;
    }

    /// Fold another table into this one
    pub fn merge(&mut self, other: AggregateTable) {
        for (code, metrics) in other.rows {
            self.add(code, metrics);
        }
    }

    pub fn get(&self, iso3: &str) -> Option<&Metrics> {
        self.rows.get(iso3)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Metrics)> {
        self.rows.iter().map(|(code, m)| (code.as_str(), m))
    }

    /// Rows ordered by `metric` descending, ties by code ascending
    pub fn sorted_by(&self, metric: Metric) -> Vec<(&str, &Metrics)> {
        let mut rows: Vec<(&str, &Metrics)> = self.iter().collect();
        rows.sort_by(|a, b| b.1.get(metric).cmp(&a.1.get(metric)).then(a.0.cmp(b.0)));
        rows
    }

    pub fn totals(&self) -> Metrics {
        let mut total = Metrics::default();
        for metrics in self.rows.values() {
            total += *metrics;
        }
        total
    }

    /// Write as CSV with an `iso3` index column, rows ordered by sessions descending.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record([
            INDEX_COLUMN,
            Metric::Sessions.column(),
            Metric::Users.column(),
            Metric::Pageviews.column(),
        ])?;
        for (iso3, m) in self.sorted_by(Metric::Sessions) {
            wtr.serialize(CsvRow {
                iso3,
                sessions: m.sessions,
                users: m.users,
                pageviews: m.pageviews,
            })?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv_file(&self, path: &Path) -> Result<(), TableError> {
        let file = File::create(path)?;
        self.write_csv(file)
    }

    /// Read a table written by [`AggregateTable::write_csv`].
    ///
    /// Column order is free, absent metric columns read as zero, `ga:`-prefixed names are
    /// accepted, and fractional values are truncated. Repeated codes are summed.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();

        let index = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(INDEX_COLUMN))
            .ok_or(TableError::MissingColumn(INDEX_COLUMN))?;
        let metric_columns: Vec<(usize, Metric)> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| Metric::from_column(h).map(|m| (i, m)))
            .collect();

        let mut table = AggregateTable::new();
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let code = record.get(index).unwrap_or("").trim().to_uppercase();
            if code.is_empty() {
                continue;
            }

            let mut metrics = Metrics::default();
            for (i, metric) in &metric_columns {
                let raw = record.get(*i).unwrap_or("");
                let value = parse_count(raw).ok_or_else(|| TableError::BadValue {
                    line,
                    column: metric.column().to_string(),
                    value: raw.to_string(),
                })?;
                metrics.set(*metric, value);
            }
            table.add(code, metrics);
        }

        Ok(table)
    }

    pub fn read_csv_file(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path)?;
        Self::read_csv(file)
    }
}

/// Parse a count, truncating fractions. Blank is zero.
pub fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(0);
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Some(f.trunc() as u64),
        _ => None,
    }
}

/// Sum rows into a table keyed by resolved three-letter code.
///
/// The result does not depend on row order. An unmapped country code fails the whole
/// aggregation.
pub fn aggregate<'a, I>(rows: I, countries: &CountryRef) -> Result<AggregateTable, CountryError>
where
    I: IntoIterator<Item = &'a MetricRow>,
{
    let mut table = AggregateTable::new();
    for row in rows {
        let iso3 = countries.resolve(&row.country_code)?;
        table.add(iso3, Metrics::from(row));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(code: &str, sessions: u64, users: u64, pageviews: u64) -> MetricRow {
        MetricRow {
            country_code: code.to_string(),
            sessions,
            users,
            pageviews,
        }
    }

    fn countries() -> CountryRef {
        CountryRef::embedded().unwrap()
    }

    #[test]
    fn test_two_reports_sum_per_country() {
        let first = vec![row("FR", 10, 0, 0)];
        let second = vec![row("FR", 5, 0, 0), row("DE", 7, 0, 0)];

        let mut table = aggregate(&first, &countries()).unwrap();
        table.merge(aggregate(&second, &countries()).unwrap());

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("FRA").unwrap().sessions, 15);
        assert_eq!(table.get("DEU").unwrap().sessions, 7);

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "iso3,sessions,users,pageviews");
        assert_eq!(lines[1], "FRA,15,0,0");
        assert_eq!(lines[2], "DEU,7,0,0");
    }

    #[test]
    fn test_order_independent() {
        let rows = vec![
            row("FR", 10, 4, 30),
            row("DE", 7, 3, 12),
            row("FR", 5, 2, 9),
            row("ZZ", 1, 1, 1),
            row("US", 100, 80, 400),
        ];
        let forward = aggregate(&rows, &countries()).unwrap();
        let reversed: Vec<MetricRow> = rows.iter().rev().cloned().collect();
        let backward = aggregate(&reversed, &countries()).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(
            forward.get("FRA"),
            Some(&Metrics {
                sessions: 15,
                users: 6,
                pageviews: 39
            })
        );
        assert_eq!(forward.get("ZZZ").unwrap().pageviews, 1);
    }

    #[test]
    fn test_unknown_code_fails_aggregation() {
        let rows = vec![row("FR", 1, 1, 1), row("XX", 1, 1, 1)];
        assert!(matches!(
            aggregate(&rows, &countries()),
            Err(CountryError::UnknownCode(_))
        ));
    }

    #[test]
    fn test_empty_rows() {
        let table = aggregate(&Vec::<MetricRow>::new(), &countries()).unwrap();
        assert!(table.is_empty());

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "iso3,sessions,users,pageviews\n");
    }

    #[test]
    fn test_csv_roundtrip() {
        let rows = vec![row("FR", 15, 9, 40), row("DE", 7, 7, 7), row("ZZ", 2, 1, 3)];
        let table = aggregate(&rows, &countries()).unwrap();

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let back = AggregateTable::read_csv(out.as_slice()).unwrap();
        assert_eq!(table, back);
    }

    #[test]
    fn test_csv_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions_all_2023-01-01_2023-03-31.csv");
        let mut table = AggregateTable::new();
        table.add("JPN", Metrics { sessions: 3, users: 2, pageviews: 11 });
        table.write_csv_file(&path).unwrap();
        assert_eq!(AggregateTable::read_csv_file(&path).unwrap(), table);
    }

    #[test]
    fn test_read_csv_tolerates_layout() {
        let text = "ga:pageviews,iso3,ga:sessions\n12.7,fra,3\n,DEU,\n5,FRA,1\n";
        let table = AggregateTable::read_csv(text.as_bytes()).unwrap();
        assert_eq!(
            table.get("FRA"),
            Some(&Metrics {
                sessions: 4,
                users: 0,
                pageviews: 17
            })
        );
        assert_eq!(table.get("DEU"), Some(&Metrics::default()));
    }

    #[test]
    fn test_read_csv_requires_index() {
        let text = "code,sessions\nFRA,1\n";
        assert!(matches!(
            AggregateTable::read_csv(text.as_bytes()),
            Err(TableError::MissingColumn("iso3"))
        ));
    }

    #[test]
    fn test_read_csv_rejects_garbage() {
        let text = "iso3,sessions\nFRA,lots\n";
        match AggregateTable::read_csv(text.as_bytes()) {
            Err(TableError::BadValue { column, value, .. }) => {
                assert_eq!(column, "sessions");
                assert_eq!(value, "lots");
            }
            other => panic!("expected BadValue, got {:?}", other),
        }
    }

    #[test]
    fn test_sorted_by_is_non_increasing() {
        let mut table = AggregateTable::new();
        table.add("FRA", Metrics { sessions: 5, users: 1, pageviews: 50 });
        table.add("DEU", Metrics { sessions: 9, users: 1, pageviews: 10 });
        table.add("USA", Metrics { sessions: 9, users: 1, pageviews: 90 });

        let by_sessions: Vec<&str> = table.sorted_by(Metric::Sessions).iter().map(|r| r.0).collect();
        assert_eq!(by_sessions, vec!["DEU", "USA", "FRA"]);

        let by_views: Vec<&str> = table.sorted_by(Metric::Pageviews).iter().map(|r| r.0).collect();
        assert_eq!(by_views, vec!["USA", "FRA", "DEU"]);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("42"), Some(42));
        assert_eq!(parse_count("42.9"), Some(42));
        assert_eq!(parse_count(""), Some(0));
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count("NaN"), None);
    }

    #[test]
    fn test_metric_titles() {
        assert_eq!(Metric::Pageviews.title(), "Views");
        assert_eq!(Metric::Sessions.column(), "sessions");
        assert_eq!(Metric::from_column("ga:users"), Some(Metric::Users));
        assert_eq!(Metric::from_column("iso3"), None);
    }
}
