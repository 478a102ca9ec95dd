//! HTTP client for the backend's "record my location" endpoint.
//!
//! Reporting is best-effort: the store fires it off in the background and
//! only logs failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const RECORD_PATH: &str = "api/location/record/";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("location report rejected: bearer token missing or expired")]
    Unauthorized,

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base URL \"{base_url}\": {reason}")]
    InvalidBaseUrl { base_url: String, reason: String },
}

/// Request body for the record endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationReport {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Location record as stored by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredLocation {
    #[serde(default)]
    pub id: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub trait LocationReporter: Send + Sync {
    fn report<'a>(
        &'a self,
        bearer_token: &'a str,
        report: &'a LocationReport,
    ) -> BoxFuture<'a, Result<StoredLocation, ReportError>>;
}

/// `reqwest`-backed [`LocationReporter`].
#[derive(Debug, Clone)]
pub struct LocationApiClient {
    client: Client,
    endpoint: Url,
}

impl LocationApiClient {
    /// # Errors
    ///
    /// Returns [`ReportError::Http`] if the `reqwest::Client` cannot be built,
    /// or [`ReportError::InvalidBaseUrl`] if `base_url` does not parse.
    pub fn with_base_url(base_url: &str, timeout_secs: u64) -> Result<Self, ReportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("shopgeo/0.1 (location-report)")
            .build()?;

        // Exactly one trailing slash so `join` appends instead of replacing
        // the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&normalised)
            .and_then(|base| base.join(RECORD_PATH))
            .map_err(|e| ReportError::InvalidBaseUrl {
                base_url: base_url.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Posts one location report.
    ///
    /// # Errors
    ///
    /// - [`ReportError::Unauthorized`] on HTTP 401.
    /// - [`ReportError::UnexpectedStatus`] on any other non-2xx status.
    /// - [`ReportError::Http`] on network failure.
    /// - [`ReportError::Deserialize`] if the body is not a stored location.
    pub async fn record_location(
        &self,
        bearer_token: &str,
        report: &LocationReport,
    ) -> Result<StoredLocation, ReportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(bearer_token)
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ReportError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ReportError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.endpoint.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ReportError::Deserialize {
            context: format!("location record from {}", self.endpoint),
            source: e,
        })
    }
}

impl LocationReporter for LocationApiClient {
    fn report<'a>(
        &'a self,
        bearer_token: &'a str,
        report: &'a LocationReport,
    ) -> BoxFuture<'a, Result<StoredLocation, ReportError>> {
        self.record_location(bearer_token, report).boxed()
    }
}
