//! # forecast-gateway
//!
//! A caching HTTP gateway in front of the OpenWeatherMap One Call API,
//! served by a from-scratch async HTTP/1.1 stack.
//!
//! The forecast for one fixed location is fetched on demand and kept for an
//! hour. Concurrent requests after expiry share a single upstream call, and a
//! failed refresh never disturbs the cached forecast.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use forecast_gateway::cache::ForecastCache;
//! use forecast_gateway::clock::SystemClock;
//! use forecast_gateway::config::GatewayConfig;
//! use forecast_gateway::server::Server;
//! use forecast_gateway::upstream::OpenWeatherClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::from_env()?;
//!     let source = Arc::new(OpenWeatherClient::new(&config)?);
//!     let cache = Arc::new(ForecastCache::new(source, Arc::new(SystemClock), config.cache_ttl));
//!     let server = Server::bind(&config.listen_addr).await?;
//!     forecast_gateway::gateway::serve(server, cache, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```

// ── Forecast core ─────────────────────────────────────────────────────────────
pub mod cache;
pub mod clock;
pub mod config;
pub mod upstream;

// ── HTTP serving stack ────────────────────────────────────────────────────────
pub mod context;
pub mod gateway;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheStatus, CachedForecast, ForecastCache, ForecastOutcome};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
pub use upstream::{FetchError, ForecastSource, OpenWeatherClient};
