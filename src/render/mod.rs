//! Map rendering from an aggregated country table.
//!
//! Both renderers work from the same [`JoinedTable`], so the HTML page and the static image
//! agree on names, zero fill and the top-ten ranking.

pub mod interactive;
pub mod static_map;

use std::collections::BTreeMap;

use crate::aggregate::{AggregateTable, Metric, Metrics};
use crate::country::CountryRef;

pub use interactive::{render_html, write_html};
pub use static_map::{render_image, RenderError, ShapeSet};

/// Name used for codes the reference table does not know
pub const UNKNOWN_NAME: &str = "Unknown";

/// Number of countries called out on both maps
pub const TOP_N: usize = 10;

const TITLE_EXCEPTIONS: [&str; 3] = ["and", "by", "the"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRow {
    pub iso3: String,
    pub name: String,
    pub metrics: Metrics,
}

/// Every country from either the report or the reference table, keyed by alpha-3 code.
#[derive(Debug, Clone, Default)]
pub struct JoinedTable {
    rows: Vec<JoinedRow>,
}

/// Outer join of report rows with the reference table.
///
/// Countries without traffic get zero counts; report codes without a reference entry
/// (such as `ZZZ`) get the [`UNKNOWN_NAME`] placeholder.
pub fn join(table: &AggregateTable, countries: &CountryRef) -> JoinedTable {
    let mut merged: BTreeMap<&str, JoinedRow> = countries
        .alpha3_codes()
        .map(|iso3| {
            let row = JoinedRow {
                iso3: iso3.to_string(),
                name: countries.name(iso3).unwrap_or(UNKNOWN_NAME).to_string(),
                metrics: Metrics::default(),
            };
            (iso3, row)
        })
        .collect();

    for (iso3, metrics) in table.iter() {
        merged
            .entry(iso3)
            .or_insert_with(|| JoinedRow {
                iso3: iso3.to_string(),
                name: UNKNOWN_NAME.to_string(),
                metrics: Metrics::default(),
            })
            .metrics = *metrics;
    }

    JoinedTable {
        rows: merged.into_values().collect(),
    }
}

impl JoinedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, iso3: &str) -> Option<&JoinedRow> {
        self.rows.iter().find(|r| r.iso3 == iso3)
    }

    /// Rows ordered by `metric`, largest first; ties broken by code
    pub fn sorted(&self, metric: Metric) -> Vec<&JoinedRow> {
        let mut rows: Vec<&JoinedRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            b.metrics
                .get(metric)
                .cmp(&a.metrics.get(metric))
                .then_with(|| a.iso3.cmp(&b.iso3))
        });
        rows
    }

    pub fn top(&self, metric: Metric, n: usize) -> Vec<&JoinedRow> {
        let mut rows = self.sorted(metric);
        rows.truncate(n);
        rows
    }

    pub fn max(&self, metric: Metric) -> u64 {
        self.rows
            .iter()
            .map(|r| r.metrics.get(metric))
            .max()
            .unwrap_or(0)
    }
}

/// Round to three significant digits and abbreviate with `K`, `M`, `B` or `T`.
///
/// `1234` becomes `1.23K`, `999999` becomes `1M`, `42` stays `42`.
pub fn human_format(value: f64) -> String {
    const SUFFIXES: [&str; 5] = ["", "K", "M", "B", "T"];

    if value == 0.0 || !value.is_finite() {
        return "0".to_string();
    }

    let digits = value.abs().log10().floor() as i32 + 1;
    let shift = 3 - digits;
    let mut num = if shift >= 0 {
        let scale = 10f64.powi(shift);
        (value * scale).round() / scale
    } else {
        let scale = 10f64.powi(-shift);
        (value / scale).round() * scale
    };

    let mut magnitude = 0;
    while num.abs() >= 1000.0 && magnitude < SUFFIXES.len() - 1 {
        magnitude += 1;
        num /= 1000.0;
    }

    let text = format!("{:.6}", num);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", text, SUFFIXES[magnitude])
}

/// Capitalize each word except the minor words `and`, `by` and `the`, which are lower
/// cased unless they open the text. Whitespace runs collapse to single spaces.
pub fn titlecase(text: &str) -> String {
    text.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && TITLE_EXCEPTIONS.contains(&lower.as_str()) {
                lower
            } else {
                capitalize(word)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Upper case letters that follow a non-letter, lower case the rest
fn capitalize(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut prev_alpha = false;
    for c in word.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

/// Chart title shared by both renderers, e.g. `Views by Country for March 2023 to May 2023`
pub(crate) fn chart_title(metric: Metric, date_label: Option<&str>) -> String {
    match date_label {
        Some(label) if !label.is_empty() => format!("{} by Country for {}", metric.title(), label),
        _ => format!("{} by Country", metric.title()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countries() -> CountryRef {
        CountryRef::from_reader(
            "alpha2,alpha3,name\nFR,FRA,France\nDE,DEU,Germany\nIT,ITA,Italy\n".as_bytes(),
        )
        .unwrap()
    }

    fn metrics(sessions: u64, users: u64, pageviews: u64) -> Metrics {
        Metrics {
            sessions,
            users,
            pageviews,
        }
    }

    #[test]
    fn test_join_is_outer_with_zero_fill() {
        let mut table = AggregateTable::new();
        table.add("FRA", metrics(10, 8, 30));
        table.add("ZZZ", metrics(1, 1, 2));

        let joined = join(&table, &countries());
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.get("FRA").unwrap().metrics.pageviews, 30);
        assert_eq!(joined.get("DEU").unwrap().metrics, Metrics::default());
        assert_eq!(joined.get("DEU").unwrap().name, "Germany");
        assert_eq!(joined.get("ZZZ").unwrap().name, UNKNOWN_NAME);
    }

    #[test]
    fn test_sorted_is_non_increasing_with_code_ties() {
        let mut table = AggregateTable::new();
        table.add("ITA", metrics(5, 1, 1));
        table.add("DEU", metrics(5, 1, 1));
        table.add("FRA", metrics(9, 1, 1));

        let joined = join(&table, &countries());
        let sorted = joined.sorted(Metric::Sessions);
        let codes: Vec<&str> = sorted.iter().map(|r| r.iso3.as_str()).collect();
        assert_eq!(codes, vec!["FRA", "DEU", "ITA"]);
        assert!(sorted
            .windows(2)
            .all(|w| w[0].metrics.sessions >= w[1].metrics.sessions));
    }

    #[test]
    fn test_top_and_max() {
        let mut table = AggregateTable::new();
        table.add("DEU", metrics(1, 1, 70));
        table.add("FRA", metrics(1, 1, 30));

        let joined = join(&table, &countries());
        let top = joined.top(Metric::Pageviews, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].iso3, "DEU");
        assert_eq!(joined.max(Metric::Pageviews), 70);
        assert_eq!(joined.top(Metric::Pageviews, 50).len(), 3);
    }

    #[test]
    fn test_both_maps_list_the_same_top_ten() {
        let mut reference = String::from("alpha2,alpha3,name\n");
        let mut table = AggregateTable::new();
        // Ties straddle the cut between tenth and eleventh place
        let sessions = [40, 7, 7, 30, 7, 12, 7, 20, 7, 7, 7, 1];
        for (i, count) in sessions.iter().enumerate() {
            let letter = (b'A' + i as u8) as char;
            let iso3 = format!("{0}{0}{0}", letter);
            reference.push_str(&format!("{0}{0},{1},Country {0}\n", letter, iso3));
            table.add(iso3, metrics(*count, 1, 1));
        }
        let countries = CountryRef::from_reader(reference.as_bytes()).unwrap();
        let joined = join(&table, &countries);

        let fig = interactive::figure(&joined, Metric::Sessions, None);
        let note = fig["layout"]["annotations"][0]["text"].as_str().unwrap();
        let numbered = regex::Regex::new(r"^\d+\. ").unwrap();
        let from_html: Vec<&str> = note
            .split("<br>")
            .filter(|line| numbered.is_match(line))
            .collect();

        let shapes = ShapeSet::from_geojson_str(
            r#"{"type": "FeatureCollection", "features": [{"type": "Feature",
                "properties": {"ISO_A3": "AAA"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,0]]]}}]}"#,
        )
        .unwrap();
        let svg = static_map::render_svg_string(&joined, Metric::Sessions, None, &shapes).unwrap();
        let text = regex::Regex::new(r">(\d+\. [^<]+)</text>").unwrap();
        let from_image: Vec<&str> = text
            .captures_iter(&svg)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect();

        assert_eq!(from_html.len(), TOP_N);
        assert_eq!(from_html, from_image);
        assert_eq!(from_html[0], "1. Country A");
        assert_eq!(from_html[4], "5. Country B");
        assert_eq!(from_html[9], "10. Country J");
    }

    #[test]
    fn test_human_format() {
        assert_eq!(human_format(0.0), "0");
        assert_eq!(human_format(42.0), "42");
        assert_eq!(human_format(999.0), "999");
        assert_eq!(human_format(1234.0), "1.23K");
        assert_eq!(human_format(1500.0), "1.5K");
        assert_eq!(human_format(999_999.0), "1M");
        assert_eq!(human_format(4_500_000.0), "4.5M");
        assert_eq!(human_format(2_000_000_000.0), "2B");
        assert_eq!(human_format(0.5), "0.5");
    }

    #[test]
    fn test_titlecase() {
        assert_eq!(titlecase("views by country"), "Views by Country");
        assert_eq!(titlecase("the map and the key"), "The Map and the Key");
        assert_eq!(
            titlecase("sessions by country March 2023 to may 2023"),
            "Sessions by Country March 2023 To May 2023"
        );
        assert_eq!(titlecase("  extra   spaces "), "Extra Spaces");
    }

    #[test]
    fn test_chart_title() {
        assert_eq!(
            chart_title(Metric::Pageviews, Some("March 2023 to May 2023")),
            "Views by Country for March 2023 to May 2023"
        );
        assert_eq!(chart_title(Metric::Users, None), "Users by Country");
    }
}
