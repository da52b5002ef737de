//! Report fetching from the hosted analytics service.
//!
//! Two API generations are supported: the legacy Core Reporting API (views, `ga:` metrics)
//! and GA4 (properties, `runReport`). Both implement [`ReportFetcher`] and normalize their
//! responses to [`MetricRow`] before anything downstream sees them.

pub mod auth;
pub mod ga4;
pub mod universal;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::fiscal::DateRange;

pub use auth::TokenProvider;
pub use ga4::Ga4Client;
pub use universal::UniversalClient;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Per-country counts from one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricRow {
    /// Two-letter code, or `ZZ` when the country is unknown
    pub country_code: String,
    pub sessions: u64,
    pub users: u64,
    pub pageviews: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiGeneration {
    Universal,
    Ga4,
}

impl fmt::Display for ApiGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiGeneration::Universal => f.write_str("universal"),
            ApiGeneration::Ga4 => f.write_str("ga4"),
        }
    }
}

/// Something a report can be run against: a legacy view or a GA4 property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    /// `account:view` or `account:property`, matched against the skip list
    pub name: String,
    /// View id (legacy) or `properties/<id>` (GA4)
    pub id: String,
    pub api: ApiGeneration,
}

/// Capability shared by both API generations.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    fn generation(&self) -> ApiGeneration;

    /// List report sources, restricted to the named accounts when given
    async fn discover(&self, accounts: Option<&[String]>) -> Result<Vec<Source>, FetchError>;

    /// Run a country report for one source. An empty report is `Ok(vec![])`.
    async fn fetch(&self, source: &Source, range: &DateRange) -> Result<Vec<MetricRow>, FetchError>;
}

/// True when no account filter is set or `account` is in it
pub(crate) fn account_selected(accounts: Option<&[String]>, account: &str) -> bool {
    match accounts {
        Some(list) if !list.is_empty() => list.iter().any(|a| a == account),
        _ => true,
    }
}

/// Send a request and decode a JSON body, turning non-2xx statuses into errors
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    endpoint: &str,
) -> Result<T, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(FetchError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: truncate(&body, 500),
        });
    }

    serde_json::from_str(&body).map_err(|e| FetchError::Decode {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
