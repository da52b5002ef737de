use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{
    account_selected, send_json, ApiGeneration, FetchError, MetricRow, ReportFetcher, Source,
    TokenProvider,
};
use crate::aggregate::parse_count;
use crate::country::normalize_dimension;
use crate::fiscal::DateRange;

const DIMENSION: &str = "ga:countryIsoCode";
const METRICS: &str = "ga:sessions,ga:users,ga:pageviews";
const MAX_RESULTS: &str = "10000";

/// Only views with this marker in their name are reported on.
const MASTER_VIEW: &str = "master view";

#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnHeader {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GaData {
    #[serde(default)]
    column_headers: Vec<ColumnHeader>,
    #[serde(default)]
    rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    total_results: u64,
}

/// Client for the legacy Core Reporting API (v3).
pub struct UniversalClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenProvider>,
}

impl UniversalClient {
    pub fn new(client: reqwest::Client, base_url: &str, tokens: Arc<TokenProvider>) -> Self {
        UniversalClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        let token = self.tokens.access_token().await?;
        let request = self.client.get(&url).bearer_auth(token).query(query);
        send_json(request, &url).await
    }
}

#[async_trait]
impl ReportFetcher for UniversalClient {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::Universal
    }

    async fn discover(&self, accounts: Option<&[String]>) -> Result<Vec<Source>, FetchError> {
        let listed: Items<Account> = self.get("management/accounts", &[]).await?;
        let mut sources = Vec::new();

        for account in listed.items {
            debug!("Account: {} ({})", account.name, account.id);
            if !account_selected(accounts, &account.name) {
                continue;
            }

            let path = format!("management/accounts/{}/webproperties/~all/profiles", account.id);
            let profiles: Items<Profile> = self.get(&path, &[]).await?;
            for profile in profiles.items {
                let is_master = profile.name.contains(MASTER_VIEW);
                debug!(
                    "  {} Profile: {}",
                    if is_master { "*" } else { " " },
                    profile.name
                );
                if is_master {
                    sources.push(Source {
                        name: format!("{}:{}", account.name, profile.name),
                        id: profile.id,
                        api: ApiGeneration::Universal,
                    });
                }
            }
        }

        Ok(sources)
    }

    async fn fetch(&self, source: &Source, range: &DateRange) -> Result<Vec<MetricRow>, FetchError> {
        let ids = format!("ga:{}", source.id);
        let start = range.start.to_string();
        let end = range.end.to_string();
        let query = [
            ("ids", ids.as_str()),
            ("start-date", start.as_str()),
            ("end-date", end.as_str()),
            ("metrics", METRICS),
            ("dimensions", DIMENSION),
            ("max-results", MAX_RESULTS),
        ];
        let data: GaData = self.get("data/ga", &query).await?;
        rows_from_ga_data(data, &format!("{}/data/ga", self.base_url))
    }
}

/// Normalize a v3 `data/ga` response, locating columns by header name
fn rows_from_ga_data(data: GaData, endpoint: &str) -> Result<Vec<MetricRow>, FetchError> {
    let rows = match data.rows {
        Some(rows) if data.total_results > 0 || !rows.is_empty() => rows,
        _ => return Ok(Vec::new()),
    };

    let column = |name: &str| {
        data.column_headers
            .iter()
            .position(|h| h.name == name)
            .ok_or_else(|| FetchError::Decode {
                endpoint: endpoint.to_string(),
                reason: format!("missing column {}", name),
            })
    };
    let country = column(DIMENSION)?;
    let sessions = column("ga:sessions")?;
    let users = column("ga:users")?;
    let pageviews = column("ga:pageviews")?;

    rows.iter()
        .map(|row| {
            let cell = |i: usize| -> Result<u64, FetchError> {
                let raw = row.get(i).map(String::as_str).unwrap_or("");
                parse_count(raw).ok_or_else(|| FetchError::Decode {
                    endpoint: endpoint.to_string(),
                    reason: format!("bad metric value {:?}", raw),
                })
            };
            Ok(MetricRow {
                country_code: normalize_dimension(row.get(country).map(String::as_str).unwrap_or("")),
                sessions: cell(sessions)?,
                users: cell(users)?,
                pageviews: cell(pageviews)?,
            })
        })
        .collect()
}
