use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::aggregate::{aggregate, AggregateTable};
use crate::analytics::{ReportFetcher, Source};
use crate::config::Config;
use crate::country::CountryRef;
use crate::fiscal::{DateRange, DateRangeError, FiscalCalendar, FiscalQuarter};
use crate::notify::{notify, Delivery};
use crate::render::{self, ShapeSet};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("output directory {} is not writable", .0.display())]
    OutputDirNotWritable(PathBuf),
}

/// One `report` invocation
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub output: Option<PathBuf>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub quarter: Option<FiscalQuarter>,
    pub accounts: Vec<String>,
    pub send_mail: bool,
    /// Reference date for the default (previous) quarter
    pub today: NaiveDate,
}

impl ReportRequest {
    pub fn new(today: NaiveDate) -> Self {
        ReportRequest {
            output: None,
            start: None,
            end: None,
            quarter: None,
            accounts: Vec::new(),
            send_mail: true,
            today,
        }
    }
}

#[derive(Debug)]
pub struct ReportOutcome {
    pub range: DateRange,
    pub csv_path: PathBuf,
    /// True when an existing CSV was used instead of querying the APIs
    pub reused_csv: bool,
    pub table: AggregateTable,
    /// Sources that were queried, in order
    pub sources: Vec<Source>,
    pub artifacts: Vec<PathBuf>,
    pub delivery: Delivery,
}

/// Explicit dates win; otherwise the requested quarter, otherwise the last complete one.
pub fn resolve_range(
    request: &ReportRequest,
    calendar: &FiscalCalendar,
) -> Result<DateRange, DateRangeError> {
    let default = match request.quarter {
        Some(quarter) => calendar.quarter_range(quarter)?,
        None => calendar.previous_quarter(request.today)?,
    };
    DateRange::new(
        request.start.unwrap_or(default.start),
        request.end.unwrap_or(default.end),
    )
}

/// `<dir>/sessions_<accounts|all>_<start>_<end>.csv`
pub fn default_output_path(dir: &Path, accounts: &[String], range: &DateRange) -> PathBuf {
    let scope = if accounts.is_empty() {
        "all".to_string()
    } else {
        accounts.join("-")
    };
    dir.join(format!("sessions_{}_{}_{}.csv", scope, range.start, range.end))
}

fn output_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// True when `dir` exists, is a directory and the current user may create files in it
pub fn is_writable_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        match CString::new(dir.as_os_str().as_bytes()) {
            Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 },
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        std::fs::metadata(dir)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }
}

async fn fetch_all(
    config: &Config,
    request: &ReportRequest,
    fetchers: &[Box<dyn ReportFetcher>],
    range: &DateRange,
    countries: &CountryRef,
) -> Result<(AggregateTable, Vec<Source>)> {
    let accounts = (!request.accounts.is_empty()).then_some(request.accounts.as_slice());
    let skip_list = &config.analytics.skip_list;
    let mut table = AggregateTable::new();
    let mut queried = Vec::new();

    for fetcher in fetchers {
        let generation = fetcher.generation();
        let sources = fetcher
            .discover(accounts)
            .await
            .with_context(|| format!("Failed to list {} report sources", generation))?;

        for source in sources {
            if skip_list.iter().any(|s| s == &source.name) {
                info!("Skipping {}", source.name);
                continue;
            }
            info!("Querying {} source {} ({})", generation, source.name, source.id);
            let rows = fetcher
                .fetch(&source, range)
                .await
                .with_context(|| format!("Failed to fetch report for {}", source.name))?;
            let part = aggregate(&rows, countries)
                .with_context(|| format!("Bad country data from {}", source.name))?;
            table.merge(part);
            queried.push(source);
        }
    }

    Ok((table, queried))
}

/// Render the HTML and static maps next to the CSV, skipping any that already exist.
/// Returns the artifacts present afterwards.
fn render_artifacts(
    config: &Config,
    csv_path: &Path,
    table: &AggregateTable,
    countries: &CountryRef,
    range: &DateRange,
) -> Result<Vec<PathBuf>> {
    let metric = config.map.metric;
    let label = range.long_label();
    let joined = render::join(table, countries);

    let html_path = csv_path.with_extension("html");
    if html_path.exists() {
        info!("Keeping existing {}", html_path.display());
    } else {
        render::write_html(&html_path, &joined, metric, Some(&label))?;
    }

    let image_path = csv_path.with_extension(&config.map.image_extension);
    if image_path.exists() {
        info!("Keeping existing {}", image_path.display());
    } else {
        let drawn = ShapeSet::load(&config.shapes_path()).and_then(|shapes| {
            render::render_image(&image_path, &joined, metric, Some(&label), &shapes)
        });
        if let Err(e) = drawn {
            error!("Could not render static map {}: {}", image_path.display(), e);
        }
    }

    Ok([html_path, image_path]
        .into_iter()
        .filter(|p| p.exists())
        .collect())
}

/// Fetch (or reuse), aggregate, write the CSV, render maps and mail them.
///
/// `connect` builds the API clients; it is only called when the CSV has to be fetched.
pub async fn run_report<F>(
    config: &Config,
    request: &ReportRequest,
    connect: F,
) -> Result<ReportOutcome>
where
    F: FnOnce() -> Result<Vec<Box<dyn ReportFetcher>>>,
{
    let calendar = config.fiscal_calendar()?;
    let range = resolve_range(request, &calendar).context("Invalid report date range")?;
    let csv_path = request
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&config.output_dir(), &request.accounts, &range));
    let countries = CountryRef::embedded()?;

    info!("Report period {} ({})", range, range.long_label());

    let (table, sources, reused_csv) = if csv_path.exists() {
        info!("Using existing {}", csv_path.display());
        let table = AggregateTable::read_csv_file(&csv_path)
            .with_context(|| format!("Failed to read {}", csv_path.display()))?;
        (table, Vec::new(), true)
    } else {
        let dir = output_dir_of(&csv_path);
        if !is_writable_dir(&dir) {
            return Err(PipelineError::OutputDirNotWritable(dir).into());
        }
        let fetchers = connect()?;
        let (table, sources) = fetch_all(config, request, &fetchers, &range, &countries).await?;
        if table.is_empty() {
            warn!("No traffic recorded for {}", range);
        }
        table
            .write_csv_file(&csv_path)
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;
        info!("Wrote {}", csv_path.display());
        (table, sources, false)
    };

    let artifacts = render_artifacts(config, &csv_path, &table, &countries, &range)?;

    let delivery = if request.send_mail {
        notify(config, &range, &artifacts).await
    } else {
        Delivery::Skipped
    };

    Ok(ReportOutcome {
        range,
        csv_path,
        reused_csv,
        table,
        sources,
        artifacts,
        delivery,
    })
}
