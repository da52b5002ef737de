use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use super::{chart_title, JoinedTable, TOP_N};
use crate::aggregate::Metric;

/// The page loads plotly.js from here, so viewing it needs network access
const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

/// Plotly figure for a choropleth of `metric`, with the top ten labelled on the map
/// and listed in an annotation.
pub fn figure(table: &JoinedTable, metric: Metric, date_label: Option<&str>) -> Value {
    let rows = table.sorted(metric);
    let title = metric.title();

    let locations: Vec<&str> = rows.iter().map(|r| r.iso3.as_str()).collect();
    let values: Vec<u64> = rows.iter().map(|r| r.metrics.get(metric)).collect();
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    let labels: Vec<Option<&str>> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (i < TOP_N).then_some(*name))
        .collect();

    let mut annotation = format!("Top ten countries for {}:<br>", title);
    for (i, name) in names.iter().take(TOP_N).enumerate() {
        annotation.push_str(&format!("<br>{}. {}", i + 1, name));
    }

    json!({
        "data": [
            {
                "type": "choropleth",
                "locations": locations,
                "z": values,
                "text": names,
                "hovertemplate": "<b>%{text}</b><br>%{z}<extra></extra>",
                "colorscale": "Reds",
                "autocolorscale": false,
                "reversescale": false,
                "marker": {"line": {"color": "darkgray", "width": 0.5}},
                "colorbar": {"tickprefix": "", "title": {"text": title}},
            },
            {
                "type": "scattergeo",
                "locations": locations,
                "text": labels,
                "mode": "text",
                "hoverinfo": "skip",
            }
        ],
        "layout": {
            "title": {"text": chart_title(metric, date_label)},
            "geo": {
                "showframe": true,
                "showcoastlines": true,
                "projection": {"type": "equirectangular"},
            },
            "annotations": [{
                "x": 0.15,
                "y": 0.35,
                "xref": "paper",
                "yref": "paper",
                "align": "left",
                "font": {"size": 14},
                "text": annotation,
                "showarrow": false,
            }],
        },
    })
}

/// Self-contained HTML page; Plotly itself is loaded from the CDN.
pub fn render_html(table: &JoinedTable, metric: Metric, date_label: Option<&str>) -> String {
    let figure = figure(table, metric, date_label);
    let page_title = html_escape(&chart_title(metric, date_label));
    // Keep "</script>" inside data from closing the script element
    let figure_json = figure.to_string().replace("</", "<\\/");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{page_title}</title>
<script src="{cdn}" charset="utf-8"></script>
<style>html, body {{ margin: 0; height: 100%; }} #map {{ width: 100%; height: 100%; }}</style>
</head>
<body>
<div id="map"></div>
<script>
var figure = {figure_json};
Plotly.newPlot("map", figure.data, figure.layout, {{responsive: true}});
</script>
</body>
</html>
"#,
        page_title = page_title,
        cdn = PLOTLY_CDN,
        figure_json = figure_json,
    )
}

pub fn write_html(
    path: &Path,
    table: &JoinedTable,
    metric: Metric,
    date_label: Option<&str>,
) -> Result<()> {
    let html = render_html(table, metric, date_label);
    std::fs::write(path, html)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote interactive map {}", path.display());
    Ok(())
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
