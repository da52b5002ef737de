use anyhow::Result;
use colored::Colorize;

use crate::cli::{build_fetchers, print_heading};
use crate::config::Config;

/// List report sources for both API generations, marking skipped ones
pub async fn run(config: &Config, accounts: Vec<String>) -> Result<()> {
    let fetchers = build_fetchers(config)?;
    let filter = (!accounts.is_empty()).then_some(accounts.as_slice());

    print_heading("Report Sources");
    for fetcher in &fetchers {
        let sources = fetcher.discover(filter).await?;
        println!(
            "\n  {} {}",
            fetcher.generation().to_string().bold(),
            format!("({})", sources.len()).dimmed()
        );
        for source in sources {
            let skipped = config.analytics.skip_list.contains(&source.name);
            let name = if skipped {
                format!("{} (skipped)", source.name).dimmed()
            } else {
                source.name.cyan()
            };
            println!("    {} {}", name, source.id.dimmed());
        }
    }
    println!();

    Ok(())
}
