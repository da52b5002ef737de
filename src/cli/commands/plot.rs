use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tracing::warn;

use crate::aggregate::{AggregateTable, Metric};
use crate::config::Config;
use crate::country::CountryRef;
use crate::fiscal::date_range_from_filename;
use crate::render::{self, ShapeSet};

/// Render maps from an existing CSV.
///
/// With neither `--html` nor `--image`, both are written next to the CSV.
pub async fn run(
    config: &Config,
    csv_file: PathBuf,
    metric: Option<Metric>,
    html: Option<PathBuf>,
    image: Option<PathBuf>,
    show: bool,
) -> Result<()> {
    let metric = metric.unwrap_or(config.map.metric);
    let table = AggregateTable::read_csv_file(&csv_file)
        .with_context(|| format!("Failed to read {}", csv_file.display()))?;

    let calendar = config.fiscal_calendar()?;
    let label = match date_range_from_filename(&csv_file, &calendar) {
        Ok(label) => Some(label),
        Err(e) => {
            warn!("{}; titles will have no date range", e);
            None
        }
    };

    let (html, image) = match (html, image) {
        (None, None) => (
            Some(csv_file.with_extension("html")),
            Some(csv_file.with_extension(&config.map.image_extension)),
        ),
        other => other,
    };

    let countries = CountryRef::embedded()?;
    let joined = render::join(&table, &countries);

    if let Some(path) = &html {
        render::write_html(path, &joined, metric, label.as_deref())?;
        println!(
            "  {} {}",
            "Interactive map:".bold(),
            path.display().to_string().cyan()
        );
    }

    if let Some(path) = &image {
        let shapes = ShapeSet::load(&config.shapes_path())?;
        render::render_image(path, &joined, metric, label.as_deref(), &shapes)
            .with_context(|| format!("Failed to render {}", path.display()))?;
        println!(
            "  {} {}",
            "Static map:".bold(),
            path.display().to_string().cyan()
        );
    }

    if show {
        if let Some(path) = html.as_ref().or(image.as_ref()) {
            open::that(path).with_context(|| format!("Failed to open {}", path.display()))?;
        }
    }

    Ok(())
}
