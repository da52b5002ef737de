//! Quarterly per-source totals with the change from the previous fiscal quarter.
//!
//! Legacy views and GA4 properties of the same site are matched by `account:name` and
//! summed into one row.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::{Metric, Metrics, TableError};
use crate::analytics::{ApiGeneration, MetricRow, ReportFetcher, Source};
use crate::config::Config;
use crate::fiscal::{DateRange, FiscalCalendar, FiscalQuarter};
use crate::notify::{notify_summary, Delivery};
use crate::pipeline::{is_writable_dir, PipelineError};

const ALL: &str = "All";
const CHANGE_HEADER: &str = "Chg from prev qtr";

/// Suffix legacy master views carry that GA4 property names don't
const MASTER_VIEW_SUFFIX: &str = " (master view)";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("fiscal quarter {quarter} ends {end}; it must be over before it is summarized")]
    QuarterNotOver { quarter: FiscalQuarter, end: NaiveDate },

    #[error("{} already exists", .0.display())]
    OutputExists(PathBuf),
}

/// Totals for one site over both quarters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteTotals {
    pub account: String,
    pub site: String,
    pub current: Metrics,
    pub previous: Metrics,
}

impl SiteTotals {
    fn new(key: &str) -> Self {
        let (account, site) = key.split_once(':').unwrap_or((key, ""));
        SiteTotals {
            account: account.to_string(),
            site: site.to_string(),
            current: Metrics::default(),
            previous: Metrics::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub quarter: FiscalQuarter,
    pub current: DateRange,
    pub previous: DateRange,
    /// Ordered by sessions in the current quarter, descending
    pub sites: Vec<SiteTotals>,
}

impl Summary {
    pub fn new(
        quarter: FiscalQuarter,
        current: DateRange,
        previous: DateRange,
        mut sites: Vec<SiteTotals>,
    ) -> Self {
        sites.sort_by(|a, b| {
            b.current
                .sessions
                .cmp(&a.current.sessions)
                .then_with(|| a.account.cmp(&b.account))
                .then_with(|| a.site.cmp(&b.site))
        });
        Summary {
            quarter,
            current,
            previous,
            sites,
        }
    }

    /// Sums over all sites: (current, previous)
    pub fn totals(&self) -> (Metrics, Metrics) {
        let mut current = Metrics::default();
        let mut previous = Metrics::default();
        for site in &self.sites {
            current += site.current;
            previous += site.previous;
        }
        (current, previous)
    }

    /// Every CSV record: title block, column headings, the "All" row, then one row per site
    pub fn records(&self, title: &str) -> Vec<Vec<String>> {
        let mut records = vec![
            vec![title.to_string()],
            vec!["Year:".to_string(), format!("FY{}", self.quarter.year)],
            vec!["Quarter:".to_string(), format!("Q{}", self.quarter.quarter)],
        ];

        let mut heading = vec!["Account".to_string(), "Property".to_string()];
        for metric in Metric::ALL {
            heading.push(format!("# of {}", metric.column()));
            heading.push(CHANGE_HEADER.to_string());
        }
        records.push(heading);

        let (current, previous) = self.totals();
        records.push(site_record(ALL, ALL, &current, &previous));
        for site in &self.sites {
            records.push(site_record(
                &site.account,
                &site.site,
                &site.current,
                &site.previous,
            ));
        }
        records
    }

    pub fn write_csv<W: Write>(&self, title: &str, writer: W) -> Result<(), TableError> {
        let mut wtr = csv::WriterBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_writer(writer);
        for record in self.records(title) {
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv_file(&self, title: &str, path: &Path) -> Result<(), TableError> {
        let file = File::create(path)?;
        self.write_csv(title, file)
    }
}

fn site_record(account: &str, site: &str, current: &Metrics, previous: &Metrics) -> Vec<String> {
    let mut record = vec![account.to_string(), site.to_string()];
    for metric in Metric::ALL {
        record.push(current.get(metric).to_string());
        record.push(percent_change(previous.get(metric), current.get(metric)));
    }
    record
}

/// Change from `previous` to `current` in percent, rounded to three decimals.
/// Empty when there is nothing to compare against.
pub fn percent_change(previous: u64, current: u64) -> String {
    if previous == 0 {
        return String::new();
    }
    let pct = (current as f64 - previous as f64) / previous as f64 * 100.0;
    // Adding zero folds -0.0 into 0.0
    let rounded = (pct * 1000.0).round() / 1000.0 + 0.0;
    if rounded.fract() == 0.0 {
        format!("{:.1}%", rounded)
    } else {
        format!("{}%", rounded)
    }
}

/// Name a site is matched on across API generations
pub fn site_key(source: &Source) -> String {
    match source.api {
        ApiGeneration::Universal => source.name.replace(MASTER_VIEW_SUFFIX, ""),
        ApiGeneration::Ga4 => source.name.clone(),
    }
}

/// `<dir>/analytics_report_Q<n>_<year>.csv`
pub fn summary_path(dir: &Path, quarter: &FiscalQuarter) -> PathBuf {
    dir.join(format!(
        "analytics_report_Q{}_{}.csv",
        quarter.quarter, quarter.year
    ))
}

/// One `summary` invocation
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    /// Defaults to the last complete quarter before `today`
    pub quarter: Option<FiscalQuarter>,
    pub output_dir: Option<PathBuf>,
    pub accounts: Vec<String>,
    pub send_mail: bool,
    pub today: NaiveDate,
}

impl SummaryRequest {
    pub fn new(today: NaiveDate) -> Self {
        SummaryRequest {
            quarter: None,
            output_dir: None,
            accounts: Vec::new(),
            send_mail: true,
            today,
        }
    }
}

#[derive(Debug)]
pub struct SummaryOutcome {
    pub summary: Summary,
    pub csv_path: PathBuf,
    /// Sites found under only one API generation, by site name
    pub single_generation: Vec<Source>,
    pub skipped: Vec<String>,
    pub delivery: Delivery,
}

/// The summarized quarter and the one before it
pub fn summary_ranges(
    calendar: &FiscalCalendar,
    quarter: Option<FiscalQuarter>,
    today: NaiveDate,
) -> Result<(FiscalQuarter, DateRange, DateRange)> {
    let quarter = match quarter {
        Some(quarter) => quarter,
        None => calendar.quarter_of(calendar.previous_quarter(today)?.start),
    };
    let current = calendar.quarter_range(quarter)?;
    let previous = calendar.previous_quarter(current.start)?;
    if current.end >= today {
        return Err(SummaryError::QuarterNotOver {
            quarter,
            end: current.end,
        }
        .into());
    }
    Ok((quarter, current, previous))
}

/// Sites present under only one API generation
fn single_generation(by_site: &BTreeMap<String, Vec<(usize, Source)>>) -> Vec<Source> {
    by_site
        .values()
        .filter(|entries| {
            entries
                .iter()
                .all(|(_, source)| source.api == entries[0].1.api)
        })
        .flat_map(|entries| entries.iter().map(|(_, source)| source.clone()))
        .collect()
}

fn sum_rows(rows: &[MetricRow]) -> Metrics {
    let mut total = Metrics::default();
    for row in rows {
        total += Metrics::from(row);
    }
    total
}

/// Discover every source, total each site over both quarters, write the CSV and mail it.
pub async fn run_summary<F>(
    config: &Config,
    request: &SummaryRequest,
    connect: F,
) -> Result<SummaryOutcome>
where
    F: FnOnce() -> Result<Vec<Box<dyn ReportFetcher>>>,
{
    let calendar = config.fiscal_calendar()?;
    let (quarter, current, previous) = summary_ranges(&calendar, request.quarter, request.today)?;
    info!("Summary for {} ({}), compared with {}", quarter, current, previous);

    let dir = request
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output_dir());
    let csv_path = summary_path(&dir, &quarter);
    if csv_path.exists() {
        return Err(SummaryError::OutputExists(csv_path).into());
    }
    if !is_writable_dir(&dir) {
        return Err(PipelineError::OutputDirNotWritable(dir).into());
    }

    let fetchers = connect()?;
    let accounts = (!request.accounts.is_empty()).then_some(request.accounts.as_slice());

    let mut by_site: BTreeMap<String, Vec<(usize, Source)>> = BTreeMap::new();
    for (index, fetcher) in fetchers.iter().enumerate() {
        let sources = fetcher
            .discover(accounts)
            .await
            .with_context(|| format!("Failed to list {} report sources", fetcher.generation()))?;
        for source in sources {
            by_site
                .entry(site_key(&source))
                .or_default()
                .push((index, source));
        }
    }

    let single_generation = single_generation(&by_site);
    for source in &single_generation {
        info!("Only {} has {}", source.api, site_key(source));
    }

    let skip_list = &config.analytics.skip_list;
    let mut skipped = Vec::new();
    let mut sites = Vec::new();
    for (key, entries) in &by_site {
        let skip = skip_list
            .iter()
            .any(|s| s == key || entries.iter().any(|(_, source)| &source.name == s));
        if skip {
            info!("Skipping {}", key);
            skipped.push(key.clone());
            continue;
        }

        let mut totals = SiteTotals::new(key);
        for (index, source) in entries {
            let fetcher = &fetchers[*index];
            info!("Querying {} source {} ({})", source.api, source.name, source.id);
            let rows = fetcher
                .fetch(source, &current)
                .await
                .with_context(|| format!("Failed to fetch report for {}", source.name))?;
            totals.current += sum_rows(&rows);
            let rows = fetcher
                .fetch(source, &previous)
                .await
                .with_context(|| format!("Failed to fetch previous report for {}", source.name))?;
            totals.previous += sum_rows(&rows);
        }
        sites.push(totals);
    }

    let summary = Summary::new(quarter, current, previous, sites);
    if summary.sites.is_empty() {
        warn!("No sites to summarize for {}", quarter);
    }
    summary
        .write_csv_file(&config.summary.title, &csv_path)
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    info!("Wrote {}", csv_path.display());

    let delivery = if request.send_mail {
        notify_summary(config, &quarter, &current, std::slice::from_ref(&csv_path)).await
    } else {
        Delivery::Skipped
    };

    Ok(SummaryOutcome {
        summary,
        csv_path,
        single_generation,
        skipped,
        delivery,
    })
}
