mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;

use crate::config::Config;
use crate::fetcher::{self, ProfileFetcher};
use crate::rate_limit::RateLimiter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub fetcher: Arc<dyn ProfileFetcher>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Build state from config: the configured fetch strategy and an in-memory rate limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetcher cannot be constructed.
    pub fn from_config(config: Config) -> Result<Self> {
        let fetcher = fetcher::from_config(&config).context("Failed to initialize fetcher")?;
        let rate_limiter = RateLimiter::new(config.rate_limit_max_requests, config.rate_limit_window);
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            rate_limiter,
        })
    }
}

/// Start the web server and run until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn serve(
    config: Config,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.web_host, config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let state = AppState::from_config(config)?;

    if state.rate_limiter.is_enabled() {
        tokio::spawn(state.rate_limiter.clone().run_sweeper());
    }

    info!(
        addr = %addr,
        strategy = state.fetcher.strategy_id(),
        max_requests = state.rate_limiter.max_requests(),
        window_secs = state.rate_limiter.window().as_secs(),
        "Starting HTTP web server"
    );

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("Web server error")?;

    Ok(())
}

/// Create the main application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
