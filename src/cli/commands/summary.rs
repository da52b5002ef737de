use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::cli::{build_fetchers, print_heading};
use crate::config::Config;
use crate::fiscal::FiscalQuarter;
use crate::notify::Delivery;
use crate::summary::{percent_change, run_summary, site_key, SummaryRequest};

/// Per-site totals for a fiscal quarter against the quarter before
pub async fn run(
    config: &Config,
    quarter: Option<String>,
    accounts: Vec<String>,
    output_dir: Option<PathBuf>,
    no_mail: bool,
) -> Result<()> {
    let today = chrono::Local::now().date_naive();

    let mut request = SummaryRequest::new(today);
    request.quarter = quarter
        .map(|q| q.parse::<FiscalQuarter>())
        .transpose()
        .context("Invalid --quarter")?;
    request.accounts = accounts
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    request.output_dir = output_dir;
    request.send_mail = !no_mail;

    let outcome = run_summary(config, &request, || build_fetchers(config)).await?;
    let summary = &outcome.summary;

    print_heading(&format!("Quarterly Summary {}", summary.quarter));
    println!(
        "  {} {} {}",
        "Period:".bold(),
        summary.current.to_string().bright_yellow(),
        format!("(previous {})", summary.previous).dimmed()
    );
    println!(
        "  {} {}",
        "CSV:".bold(),
        outcome.csv_path.display().to_string().cyan()
    );

    let (current, previous) = summary.totals();
    println!(
        "\n  {} {} {}",
        format!("{:<40}", "All").bold(),
        format!("{:>10}", current.sessions).bright_yellow(),
        format!("{:>10}", percent_change(previous.sessions, current.sessions)).dimmed()
    );
    for site in &summary.sites {
        println!(
            "  {:<40} {:>10} {}",
            format!("{}:{}", site.account, site.site),
            site.current.sessions,
            format!(
                "{:>10}",
                percent_change(site.previous.sessions, site.current.sessions)
            )
            .dimmed()
        );
    }

    if !outcome.skipped.is_empty() {
        println!(
            "\n  {} {}",
            "Skipped:".bold(),
            outcome.skipped.join(", ").dimmed()
        );
    }
    if !outcome.single_generation.is_empty() {
        println!("\n  {}", "Found under one API only:".bold());
        for source in &outcome.single_generation {
            println!(
                "    {} {}",
                site_key(source).cyan(),
                format!("({})", source.api).dimmed()
            );
        }
    }

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
