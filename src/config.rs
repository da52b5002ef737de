use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregate::Metric;
use crate::fiscal::{FiscalCalendar, DEFAULT_FISCAL_START_MONTH};

const APP_NAME: &str = "geostats";
const CONFIG_NAME: &str = "config";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub mail: MailConfig,
    pub analytics: AnalyticsConfig,
    pub fiscal: FiscalConfig,
    pub map: MapConfig,
    pub summary: SummaryConfig,
}

/// Where artifacts are written and where they are published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Base URL the artifacts are served from, used for links in the mail body
    pub reports_url: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            reports_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub enabled: bool,
    pub from: String,
    pub to: Vec<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl Default for MailConfig {
    fn default() -> Self {
        MailConfig {
            enabled: true,
            from: String::new(),
            to: Vec::new(),
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// OAuth credential cache (client id/secret, refresh token, cached access token)
    pub credentials_path: PathBuf,
    /// Service-account key for GA4; the OAuth cache is used when the file is absent
    pub ga4_credentials_path: PathBuf,
    /// Sources to leave out, as `account:name`
    pub skip_list: Vec<String>,
    /// Rows requested per GA4 report page
    pub page_size: u32,
    pub token_url: String,
    pub universal_api_url: String,
    pub admin_api_url: String,
    pub data_api_url: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            credentials_path: PathBuf::from("~/.analytics/credentials.json"),
            ga4_credentials_path: PathBuf::from("~/.analytics/analytics-ga4.json"),
            skip_list: Vec::new(),
            page_size: 1000,
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            universal_api_url: "https://www.googleapis.com/analytics/v3".to_string(),
            admin_api_url: "https://analyticsadmin.googleapis.com/v1beta".to_string(),
            data_api_url: "https://analyticsdata.googleapis.com/v1beta".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiscalConfig {
    /// Month (1-12) the fiscal year begins in
    pub start_month: u32,
}

impl Default for FiscalConfig {
    fn default() -> Self {
        FiscalConfig {
            start_month: DEFAULT_FISCAL_START_MONTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Metric that drives map colors and the top-ten ranking
    pub metric: Metric,
    /// GeoJSON feature collection of country boundaries
    pub shapes_path: PathBuf,
    /// Extension of the static map; `jpg`, `png` or `svg`
    pub image_extension: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            metric: Metric::Pageviews,
            shapes_path: PathBuf::from("~/Downloads/ne_10m_admin_0_map_units.geojson"),
            image_extension: "jpg".to_string(),
        }
    }
}

/// Quarterly per-source summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// First line of the summary CSV
    pub title: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            title: "Collections quarterly report - analytics".to_string(),
        }
    }
}

impl Config {
    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.output.dir)
    }

    pub fn credentials_path(&self) -> PathBuf {
        expand_path(&self.analytics.credentials_path)
    }

    pub fn ga4_credentials_path(&self) -> PathBuf {
        expand_path(&self.analytics.ga4_credentials_path)
    }

    pub fn shapes_path(&self) -> PathBuf {
        expand_path(&self.map.shapes_path)
    }

    pub fn fiscal_calendar(&self) -> Result<FiscalCalendar> {
        FiscalCalendar::new(self.fiscal.start_month).context("Invalid [fiscal] section")
    }
}

/// Load the configuration from the default location, creating it on first use
pub fn load_config() -> Result<Config> {
    confy::load(APP_NAME, CONFIG_NAME).context("Failed to load configuration")
}

/// Load the configuration from an explicit file, or the default location when `None`
pub fn load_config_from(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => confy::load_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => load_config(),
    }
}

pub fn save_config(config: &Config) -> Result<()> {
    confy::store(APP_NAME, CONFIG_NAME, config).context("Failed to save configuration")
}

pub fn config_path() -> Result<PathBuf> {
    confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
        .context("Failed to resolve configuration path")
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fiscal.start_month, 9);
        assert_eq!(config.mail.smtp_host, "localhost");
        assert_eq!(config.mail.smtp_port, 25);
        assert_eq!(config.map.metric, Metric::Pageviews);
        assert_eq!(config.map.image_extension, "jpg");
        assert!(config.mail.enabled);
        assert_eq!(
            config.analytics.ga4_credentials_path,
            PathBuf::from("~/.analytics/analytics-ga4.json")
        );
        assert!(config.ga4_credentials_path().ends_with(".analytics/analytics-ga4.json"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let text = r#"
[output]
dir = "/srv/reports"
reports_url = "https://example.org/reports"

[mail]
from = "reports@example.org"
to = ["a@example.org", "b@example.org"]

[analytics]
skip_list = ["Library:Test Site"]
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.output.dir, PathBuf::from("/srv/reports"));
        assert_eq!(config.mail.to.len(), 2);
        assert_eq!(config.mail.smtp_port, 25);
        assert_eq!(config.analytics.skip_list, vec!["Library:Test Site"]);
        assert_eq!(config.analytics.page_size, 1000);
        assert_eq!(config.fiscal.start_month, 9);
    }

    #[test]
    fn test_metric_in_toml() {
        let config: Config = toml::from_str("[map]\nmetric = \"sessions\"\n").unwrap();
        assert_eq!(config.map.metric, Metric::Sessions);
    }

    #[test]
    fn test_load_config_from_path_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geostats.toml");

        let mut config = Config::default();
        config.output.reports_url = "https://example.org/r".to_string();
        config.fiscal.start_month = 7;
        confy::store_path(&path, &config).unwrap();

        let loaded = load_config_from(Some(&path)).unwrap();
        assert_eq!(loaded.output.reports_url, "https://example.org/r");
        assert_eq!(loaded.fiscal.start_month, 7);
        assert_eq!(loaded.fiscal_calendar().unwrap().start_month(), 7);
    }

    #[test]
    fn test_bad_start_month_rejected() {
        let mut config = Config::default();
        config.fiscal.start_month = 13;
        assert!(config.fiscal_calendar().is_err());
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path(Path::new("~/reports"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}
