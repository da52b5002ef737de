use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::Config;
use crate::fiscal::parse_date;

/// Print the last complete fiscal quarter before `date` (default today)
pub async fn run(config: &Config, date: Option<String>) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let date = match date {
        Some(text) => parse_date(&text, today).context("Invalid date")?,
        None => today,
    };

    let calendar = config.fiscal_calendar()?;
    let range = calendar.previous_quarter(date)?;
    let quarter = calendar.quarter_of(range.start);

    println!(
        "{} {} ({})",
        quarter.to_string().bold(),
        range.to_string().bright_yellow(),
        range.long_label()
    );
    Ok(())
}
