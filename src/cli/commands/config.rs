use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::config::{config_path, Config};

/// Show where the configuration lives and what it currently holds
pub async fn run(config: &Config, explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };
    println!("{} {}", "Config file:".bold(), path.display().to_string().cyan());
    println!(
        "{} {}",
        "Credentials:".bold(),
        config.credentials_path().display().to_string().cyan()
    );
    println!(
        "{} {}\n",
        "Shapes:".bold(),
        config.shapes_path().display().to_string().cyan()
    );

    let text = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("{}", text);
    Ok(())
}
