//! The HTTP face of the forecast cache.
//!
//! | Route              | Response                                             |
//! |--------------------|------------------------------------------------------|
//! | `GET /api/weather` | forecast with cache metadata, or `503`               |
//! | `GET /api/health`  | liveness plus cache validity; never fetches          |
//! | `GET /`            | static service descriptor                            |

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;

use crate::cache::{CachedForecast, ForecastCache, ForecastOutcome};
use crate::context::Context;
use crate::middleware::{LoggerMiddleware, Pipeline, Service};
use crate::security::CorsMiddleware;
use crate::server::{Server, ServerError};
use crate::upstream::ForecastPayload;
use crate::{Response, Router, StatusCode};

pub const SERVICE_NAME: &str = "Tempelhofer Feld Weather API";
pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch weather data from OpenWeatherMap";

/// Where cached forecasts live; reported to clients as `cache_type`.
const CACHE_TYPE: &str = "memory";

/// RFC 3339 / ISO-8601 in UTC with millisecond precision.
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Serialize)]
struct WeatherBody<'a> {
    success: bool,
    data: &'a ForecastPayload,
    cached: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stale: bool,
    cache_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fetched_at: Option<String>,
}

impl<'a> WeatherBody<'a> {
    fn fresh(entry: &'a CachedForecast) -> Self {
        Self {
            success: true,
            data: &entry.payload,
            cached: false,
            stale: false,
            cache_type: CACHE_TYPE,
            cached_at: None,
            fetched_at: Some(iso8601(entry.fetched_at)),
        }
    }

    fn cached(entry: &'a CachedForecast, stale: bool) -> Self {
        Self {
            success: true,
            data: &entry.payload,
            cached: true,
            stale,
            cache_type: CACHE_TYPE,
            cached_at: Some(iso8601(entry.fetched_at)),
            fetched_at: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: String,
    cache_valid: bool,
}

/// Translates a cache outcome into the `/api/weather` response.
pub fn weather_response(outcome: &ForecastOutcome) -> Response {
    match outcome {
        ForecastOutcome::Fresh(entry) => Response::json(StatusCode::Ok, &WeatherBody::fresh(entry)),
        ForecastOutcome::Cached(entry) => {
            Response::json(StatusCode::Ok, &WeatherBody::cached(entry, false))
        }
        ForecastOutcome::Stale { entry, .. } => {
            Response::json(StatusCode::Ok, &WeatherBody::cached(entry, true))
        }
        ForecastOutcome::Failure(_) => Response::json(
            StatusCode::ServiceUnavailable,
            &ErrorBody {
                success: false,
                error: FETCH_FAILED_MESSAGE,
            },
        ),
    }
}

async fn weather(cache: Arc<ForecastCache>) -> Response {
    weather_response(&cache.get_forecast().await)
}

async fn health(cache: Arc<ForecastCache>) -> Response {
    let status = cache.status().await;
    Response::json(
        StatusCode::Ok,
        &HealthBody {
            status: "healthy",
            timestamp: iso8601(status.now),
            cache_valid: status.valid,
        },
    )
}

fn index() -> Response {
    Response::json(
        StatusCode::Ok,
        &json!({
            "name": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "/api/weather": "Get weather forecast (cached for 1 hour)",
                "/api/health": "Health check",
            },
        }),
    )
}

/// Route table for the gateway endpoints.
pub fn router(cache: Arc<ForecastCache>) -> Router {
    let mut router = Router::new();

    let weather_cache = Arc::clone(&cache);
    router.get("/api/weather", move |_ctx: Context| weather(Arc::clone(&weather_cache)));

    let health_cache = cache;
    router.get("/api/health", move |_ctx: Context| health(Arc::clone(&health_cache)));

    router.get("/", |_ctx: Context| async { index() });
    router
}

/// Endpoints behind request logging and the CORS policy.
pub fn service(cache: Arc<ForecastCache>) -> Service {
    Pipeline::new(router(cache))
        .with(Arc::new(LoggerMiddleware))
        .with(Arc::new(CorsMiddleware::new()))
        .into_service()
}

/// Serves the gateway on `server` until `shutdown` resolves.
pub async fn serve<S>(server: Server, cache: Arc<ForecastCache>, shutdown: S) -> Result<(), ServerError>
where
    S: Future<Output = ()>,
{
    let service = service(cache);
    server
        .run_with_shutdown(
            move |request| {
                let service = service.clone();
                async move { service.call(request).await }
            },
            shutdown,
        )
        .await
}
