use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use super::{
    account_selected, send_json, ApiGeneration, FetchError, MetricRow, ReportFetcher, Source,
    TokenProvider,
};
use crate::aggregate::parse_count;
use crate::country::normalize_dimension;
use crate::fiscal::DateRange;

const DIMENSION: &str = "countryId";
const SESSIONS: &str = "sessions";
const USERS: &str = "totalUsers";
const PAGEVIEWS: &str = "screenPageViews";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountSummaries {
    #[serde(default)]
    account_summaries: Vec<AccountSummary>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountSummary {
    display_name: String,
    #[serde(default)]
    property_summaries: Vec<PropertySummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertySummary {
    property: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Value {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    #[serde(default)]
    dimension_values: Vec<Value>,
    #[serde(default)]
    metric_values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReportResponse {
    #[serde(default)]
    dimension_headers: Vec<Header>,
    #[serde(default)]
    metric_headers: Vec<Header>,
    #[serde(default)]
    rows: Vec<ReportRow>,
    #[serde(default)]
    row_count: u64,
}

/// Client for the GA4 Admin (discovery) and Data (`runReport`) APIs.
pub struct Ga4Client {
    client: reqwest::Client,
    admin_url: String,
    data_url: String,
    tokens: Arc<TokenProvider>,
    page_size: u32,
}

impl Ga4Client {
    pub fn new(
        client: reqwest::Client,
        admin_url: &str,
        data_url: &str,
        tokens: Arc<TokenProvider>,
        page_size: u32,
    ) -> Self {
        Ga4Client {
            client,
            admin_url: admin_url.trim_end_matches('/').to_string(),
            data_url: data_url.trim_end_matches('/').to_string(),
            tokens,
            page_size: page_size.max(1),
        }
    }

    async fn run_report_page(
        &self,
        url: &str,
        range: &DateRange,
        offset: u64,
    ) -> Result<RunReportResponse, FetchError> {
        let body = json!({
            "dimensions": [{"name": DIMENSION}],
            "metrics": [{"name": SESSIONS}, {"name": USERS}, {"name": PAGEVIEWS}],
            "dateRanges": [{
                "startDate": range.start.to_string(),
                "endDate": range.end.to_string(),
            }],
            "offset": offset,
            "limit": self.page_size,
        });
        let token = self.tokens.access_token().await?;
        let request = self.client.post(url).bearer_auth(token).json(&body);
        send_json(request, url).await
    }
}

fn ga4_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+-\s+GA4$").expect("valid regex"))
}

fn hosted_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+Hosted at New York University$").expect("valid regex"))
}

/// Strip the " - GA4" marker, and the hosting suffix from finding-aid properties,
/// so GA4 names line up with their legacy counterparts in the skip list.
pub fn clean_property_name(display_name: &str) -> String {
    let name = ga4_suffix().replace(display_name, "");
    if name.starts_with("Finding Aids") {
        hosted_suffix().replace(&name, "").into_owned()
    } else {
        name.into_owned()
    }
}

#[async_trait]
impl ReportFetcher for Ga4Client {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::Ga4
    }

    async fn discover(&self, accounts: Option<&[String]>) -> Result<Vec<Source>, FetchError> {
        let url = format!("{}/accountSummaries", self.admin_url);
        let page_size = self.page_size.to_string();
        let mut page_token: Option<String> = None;
        let mut sources = Vec::new();

        loop {
            let bearer = self.tokens.access_token().await?;
            let request = {
                let mut query = vec![("pageSize", page_size.as_str())];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.client.get(&url).bearer_auth(bearer).query(&query)
            };
            let page: AccountSummaries = send_json(request, &url).await?;

            for account in page.account_summaries {
                if !account_selected(accounts, &account.display_name) {
                    continue;
                }
                for property in account.property_summaries {
                    debug!(
                        "Property: {} ({})",
                        property.display_name, property.property
                    );
                    sources.push(Source {
                        name: format!(
                            "{}:{}",
                            account.display_name,
                            clean_property_name(&property.display_name)
                        ),
                        id: property.property,
                        api: ApiGeneration::Ga4,
                    });
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(sources)
    }

    async fn fetch(&self, source: &Source, range: &DateRange) -> Result<Vec<MetricRow>, FetchError> {
        let url = format!("{}/{}:runReport", self.data_url, source.id);
        let mut rows = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let page = self.run_report_page(&url, range, offset).await?;
            let received = page.rows.len();
            let row_count = page.row_count;
            debug!(
                source = %source.name,
                offset,
                received,
                row_count,
                "runReport page"
            );
            rows.extend(rows_from_report(page, &url)?);

            offset += u64::from(self.page_size);
            if received == 0 || row_count <= offset {
                break;
            }
        }

        Ok(rows)
    }
}

/// Normalize one `runReport` page, locating values by header name
fn rows_from_report(page: RunReportResponse, endpoint: &str) -> Result<Vec<MetricRow>, FetchError> {
    if page.rows.is_empty() {
        return Ok(Vec::new());
    }

    let missing = |name: &str| FetchError::Decode {
        endpoint: endpoint.to_string(),
        reason: format!("missing header {}", name),
    };
    let country = page
        .dimension_headers
        .iter()
        .position(|h| h.name == DIMENSION)
        .ok_or_else(|| missing(DIMENSION))?;
    let metric = |name: &str| {
        page.metric_headers
            .iter()
            .position(|h| h.name == name)
            .ok_or_else(|| missing(name))
    };
    let sessions = metric(SESSIONS)?;
    let users = metric(USERS)?;
    let pageviews = metric(PAGEVIEWS)?;

    page.rows
        .iter()
        .map(|row| {
            let cell = |i: usize| -> Result<u64, FetchError> {
                let raw = row.metric_values.get(i).map(|v| v.value.as_str()).unwrap_or("");
                parse_count(raw).ok_or_else(|| FetchError::Decode {
                    endpoint: endpoint.to_string(),
                    reason: format!("bad metric value {:?}", raw),
                })
            };
            let code = row
                .dimension_values
                .get(country)
                .map(|v| v.value.as_str())
                .unwrap_or("");
            Ok(MetricRow {
                country_code: normalize_dimension(code),
                sessions: cell(sessions)?,
                users: cell(users)?,
                pageviews: cell(pageviews)?,
            })
        })
        .collect()
}
