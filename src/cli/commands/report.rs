use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::cli::{build_fetchers, print_heading, print_top_ten};
use crate::config::Config;
use crate::country::CountryRef;
use crate::fiscal::{parse_date, FiscalQuarter};
use crate::notify::Delivery;
use crate::pipeline::{run_report, ReportRequest};

/// Run the full report: fetch, aggregate, write the CSV, render maps and mail them
pub async fn run(
    config: &Config,
    output: Option<PathBuf>,
    start: Option<String>,
    end: Option<String>,
    quarter: Option<String>,
    accounts: Vec<String>,
    no_mail: bool,
) -> Result<()> {
    let today = chrono::Local::now().date_naive();

    let mut request = ReportRequest::new(today);
    request.output = output;
    request.start = start
        .map(|s| parse_date(&s, today))
        .transpose()
        .context("Invalid --start")?;
    request.end = end
        .map(|s| parse_date(&s, today))
        .transpose()
        .context("Invalid --end")?;
    request.quarter = quarter
        .map(|q| q.parse::<FiscalQuarter>())
        .transpose()
        .context("Invalid --quarter")?;
    request.accounts = accounts
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    request.send_mail = !no_mail;

    let outcome = run_report(config, &request, || build_fetchers(config)).await?;

    print_heading("Analytics by Country");
    println!(
        "  {} {} ({})",
        "Period:".bold(),
        outcome.range.to_string().bright_yellow(),
        outcome.range.long_label().dimmed()
    );
    let csv_note = if outcome.reused_csv {
        " (existing file)".dimmed().to_string()
    } else {
        format!(" ({} sources)", outcome.sources.len())
            .dimmed()
            .to_string()
    };
    println!(
        "  {} {}{}",
        "CSV:".bold(),
        outcome.csv_path.display().to_string().cyan(),
        csv_note
    );
    for artifact in &outcome.artifacts {
        println!(
            "  {} {}",
            "Map:".bold(),
            artifact.display().to_string().cyan()
        );
    }

    let totals = outcome.table.totals();
    println!(
        "  {} {} sessions, {} users, {} views in {} countries",
        "Totals:".bold(),
        totals.sessions.to_string().bright_yellow(),
        totals.users.to_string().bright_yellow(),
        totals.pageviews.to_string().bright_yellow(),
        outcome.table.len()
    );

    let countries = CountryRef::embedded()?;
    print_top_ten(&outcome.table, &countries, config.map.metric);

    match &outcome.delivery {
        Delivery::Sent => println!("\n  {} {}", "Mail:".bold(), "sent".green()),
        Delivery::Failed(reason) => {
            println!("\n  {} {} {}", "Mail:".bold(), "failed".red(), reason.dimmed())
        }
        Delivery::Skipped => println!("\n  {} {}", "Mail:".bold(), "not sent".dimmed()),
    }
    println!();

    Ok(())
}
