//! Upstream forecast retrieval.
//!
//! One [`ForecastSource::fetch`] call is one network round-trip to the
//! provider. Sources hold no state between calls and never touch the cache.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::config::{GatewayConfig, Location};

/// The provider's forecast document, passed through unmodified.
pub type ForecastPayload = serde_json::Value;

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ForecastPayload, FetchError>> + Send + 'a>>;

/// Why an upstream fetch failed.
///
/// The cache treats every variant the same way; the distinction exists for
/// logs.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("upstream unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("upstream rejected the request with status {status}: {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("upstream returned an unreadable forecast: {0}")]
    MalformedPayload(String),
}

impl FetchError {
    /// Short, stable label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable(_) => "network_unreachable",
            Self::Timeout(_) => "timeout",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::MalformedPayload(_) => "malformed_payload",
        }
    }
}

/// Something that can produce a fresh forecast.
pub trait ForecastSource: Send + Sync {
    fn fetch(&self) -> FetchFuture<'_>;
}

/// Fields excluded from the One Call response to keep it small.
const EXCLUDE: &str = "minutely,current,alerts";

/// Longest slice of an error body kept in [`FetchError::UpstreamRejected`].
const MAX_ERROR_BODY: usize = 500;

/// OpenWeatherMap One Call 3.0 client for a single fixed location.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    location: Location,
    timeout: Duration,
}

impl OpenWeatherClient {
    /// Builds a client from the gateway configuration.
    ///
    /// A missing API key is accepted; the provider will reject the requests.
    pub fn new(config: &GatewayConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("forecast-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(config.upstream_timeout)
            .build()
            .map_err(|e| FetchError::NetworkUnreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/data/3.0/onecall", config.base_url),
            api_key: config.api_key.clone(),
            location: config.location,
            timeout: config.upstream_timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if err.is_decode() {
            FetchError::MalformedPayload(err.to_string())
        } else {
            FetchError::NetworkUnreachable(err.to_string())
        }
    }

    async fn fetch_once(&self) -> Result<ForecastPayload, FetchError> {
        let query = [
            ("lat", self.location.latitude.to_string()),
            ("lon", self.location.longitude.to_string()),
            ("exclude", EXCLUDE.to_owned()),
            ("units", "metric".to_owned()),
            ("appid", self.api_key.clone().unwrap_or_default()),
        ];

        debug!(
            endpoint = %self.endpoint,
            lat = self.location.latitude,
            lon = self.location.longitude,
            "fetching forecast from upstream"
        );

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(FetchError::UpstreamRejected {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<ForecastPayload>()
            .await
            .map_err(|e| self.classify(e))
    }
}

impl ForecastSource for OpenWeatherClient {
    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(self.fetch_once())
    }
}
