//! forecast-gateway: serves the cached Tempelhofer Feld forecast over HTTP.

use std::sync::Arc;

use tracing::{debug, info, warn};

use forecast_gateway::cache::ForecastCache;
use forecast_gateway::clock::SystemClock;
use forecast_gateway::config::GatewayConfig;
use forecast_gateway::gateway;
use forecast_gateway::server::Server;
use forecast_gateway::upstream::OpenWeatherClient;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Before the subscriber, so RUST_LOG may come from `.env`.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forecast_gateway=debug".into()),
        )
        .with_target(true)
        .init();

    if let Err(e) = dotenv {
        debug!(error = %e, "no .env file loaded");
    }

    let config = GatewayConfig::from_env()?;
    for issue in config.issues() {
        warn!(%issue, "configuration issue");
    }
    info!(
        lat = config.location.latitude,
        lon = config.location.longitude,
        ttl_secs = config.cache_ttl.as_secs(),
        serve_stale_on_error = config.serve_stale_on_error,
        upstream = %config.base_url,
        "starting forecast gateway"
    );

    let source = Arc::new(OpenWeatherClient::new(&config)?);
    let cache = ForecastCache::new(source, Arc::new(SystemClock), config.cache_ttl)
        .serve_stale_on_error(config.serve_stale_on_error);

    let server = Server::bind(&config.listen_addr).await?;
    gateway::serve(server, Arc::new(cache), shutdown_signal()).await?;

    info!("forecast gateway stopped");
    Ok(())
}
