//! HTTP client for the backend deliverability check.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, StatusCode, Url};
use shopgeo_core::LocationError;
use thiserror::Error;

use crate::types::{DeliverabilityRequest, DeliverabilityVerdict};

const CHECK_PATH: &str = "api/deliverability/check/";

#[derive(Debug, Error)]
pub enum DeliverabilityError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("deliverability check rejected the coordinates")]
    InvalidCoordinates,

    #[error("product {product_id} not found")]
    ProductNotFound { product_id: i64 },

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

impl DeliverabilityError {
    /// The user-facing failure kind for this error.
    #[must_use]
    pub fn kind(&self) -> LocationError {
        match self {
            Self::InvalidCoordinates => LocationError::InvalidCoordinates,
            Self::ProductNotFound { .. } | Self::InvalidBaseUrl { .. } => LocationError::Unknown,
            Self::Http(_) | Self::UnexpectedStatus { .. } | Self::Deserialize { .. } => {
                LocationError::NetworkError
            }
        }
    }
}

/// Remote source of deliverability verdicts.
pub trait DeliverabilityBackend: Send + Sync {
    fn check<'a>(
        &'a self,
        request: &'a DeliverabilityRequest,
    ) -> BoxFuture<'a, Result<DeliverabilityVerdict, DeliverabilityError>>;
}

/// `reqwest`-backed [`DeliverabilityBackend`]. The endpoint is public, so
/// no credential is sent.
#[derive(Debug, Clone)]
pub struct DeliverabilityClient {
    client: Client,
    endpoint: Url,
}

impl DeliverabilityClient {
    /// # Errors
    ///
    /// Returns [`DeliverabilityError::Http`] if the `reqwest::Client` cannot be
    /// built, or [`DeliverabilityError::InvalidBaseUrl`] if `base_url` does
    /// not parse.
    pub fn with_base_url(base_url: &str, timeout_secs: u64) -> Result<Self, DeliverabilityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("shopgeo/0.1 (deliverability)")
            .build()?;

        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&normalised)
            .and_then(|base| base.join(CHECK_PATH))
            .map_err(|e| DeliverabilityError::InvalidBaseUrl {
                base_url: base_url.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Asks the backend whether `request.product_id` ships to the given point.
    ///
    /// # Errors
    ///
    /// - [`DeliverabilityError::InvalidCoordinates`] on HTTP 400.
    /// - [`DeliverabilityError::ProductNotFound`] on HTTP 404.
    /// - [`DeliverabilityError::UnexpectedStatus`] on any other non-2xx status.
    /// - [`DeliverabilityError::Http`] on network failure.
    /// - [`DeliverabilityError::Deserialize`] if the body is not a verdict.
    pub async fn check_deliverability(
        &self,
        request: &DeliverabilityRequest,
    ) -> Result<DeliverabilityVerdict, DeliverabilityError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST => return Err(DeliverabilityError::InvalidCoordinates),
            StatusCode::NOT_FOUND => {
                return Err(DeliverabilityError::ProductNotFound {
                    product_id: request.product_id,
                })
            }
            status if !status.is_success() => {
                return Err(DeliverabilityError::UnexpectedStatus {
                    status: status.as_u16(),
                    url: self.endpoint.to_string(),
                })
            }
            _ => {}
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| DeliverabilityError::Deserialize {
            context: format!("deliverability verdict for product {}", request.product_id),
            source: e,
        })
    }
}

impl DeliverabilityBackend for DeliverabilityClient {
    fn check<'a>(
        &'a self,
        request: &'a DeliverabilityRequest,
    ) -> BoxFuture<'a, Result<DeliverabilityVerdict, DeliverabilityError>> {
        self.check_deliverability(request).boxed()
    }
}
