use std::net::SocketAddr;
use std::sync::LazyLock;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::error::ApiError;
use super::AppState;
use crate::fetcher::{format_timestamp, ScrapeOutcome, ScrapeResult};

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._]{1,30}$").unwrap());

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/scrape", post(scrape))
}

async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "strategy": state.fetcher.strategy_id(),
        "endpoints": {
            "health": "GET /health",
            "scrape": "POST /scrape {\"username\": string, \"limit\"?: integer}",
        },
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": format_timestamp(chrono::Utc::now()),
    }))
}

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    username: Option<String>,
    limit: Option<u32>,
}

/// POST /scrape - fetch profile and recent posts for a username.
async fn scrape(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<ScrapeResult>, ApiError> {
    let client_id = client_id(&headers, addr, state.config.trust_proxy_headers);
    if !state.rate_limiter.allow(&client_id) {
        warn!(client = %client_id, "Rate limit exceeded");
        return Err(ApiError::RateLimited {
            max_requests: state.rate_limiter.max_requests(),
            window_secs: state.rate_limiter.window().as_secs(),
        });
    }

    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let username = validate_username(request.username.as_deref())?;
    let limit = resolve_limit(
        request.limit,
        state.config.default_post_limit,
        state.config.max_post_limit,
    )?;

    info!(username = %username, limit, client = %client_id, "Scrape requested");

    match state.fetcher.fetch(&username, limit).await {
        ScrapeOutcome::Success(result) | ScrapeOutcome::Degraded(result) => Ok(Json(result)),
        ScrapeOutcome::Failed(e) => {
            warn!(username = %username, "Scrape failed: {e}");
            Err(ApiError::from_scrape(&username, e))
        }
    }
}

/// Trim, drop a leading `@`, and check the username against the allowed charset.
fn validate_username(raw: Option<&str>) -> Result<String, ApiError> {
    let username = raw.map(str::trim).unwrap_or_default();
    let username = username.strip_prefix('@').unwrap_or(username);

    if username.is_empty() {
        return Err(ApiError::Validation("Username is required".to_string()));
    }
    if !USERNAME_PATTERN.is_match(username) {
        return Err(ApiError::Validation(format!(
            "Invalid username '{username}': use 1-30 letters, digits, periods or underscores"
        )));
    }
    Ok(username.to_string())
}

/// Apply the default when absent, reject zero, clamp to the configured maximum.
fn resolve_limit(requested: Option<u32>, default: u32, max: u32) -> Result<u32, ApiError> {
    match requested {
        None => Ok(default.min(max)),
        Some(0) => Err(ApiError::Validation("limit must be at least 1".to_string())),
        Some(n) => Ok(n.min(max)),
    }
}

/// Identify the caller for rate limiting.
///
/// `X-Forwarded-For` / `X-Real-IP` are only read when `trust_proxy_headers` is set.
fn client_id(headers: &HeaderMap, addr: SocketAddr, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(forwarded) = headers.get("x-forwarded-for") {
            if let Ok(forwarded_str) = forwarded.to_str() {
                if let Some(first_ip) = forwarded_str.split(',').next() {
                    let first_ip = first_ip.trim();
                    if !first_ip.is_empty() {
                        return first_ip.to_string();
                    }
                }
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip") {
            if let Ok(ip_str) = real_ip.to_str() {
                return ip_str.trim().to_string();
            }
        }
    }

    addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username(Some("nasa")).unwrap(), "nasa");
        assert_eq!(validate_username(Some("  @nasa  ")).unwrap(), "nasa");
        assert_eq!(validate_username(Some("jane.doe_99")).unwrap(), "jane.doe_99");

        assert!(validate_username(None).is_err());
        assert!(validate_username(Some("")).is_err());
        assert!(validate_username(Some("@")).is_err());
        assert!(validate_username(Some("../etc/passwd")).is_err());
        assert!(validate_username(Some("has space")).is_err());
        assert!(validate_username(Some("a".repeat(31).as_str())).is_err());
    }

    #[test]
    fn test_resolve_limit() {
        assert_eq!(resolve_limit(None, 12, 50).unwrap(), 12);
        assert_eq!(resolve_limit(Some(3), 12, 50).unwrap(), 3);
        assert_eq!(resolve_limit(Some(500), 12, 50).unwrap(), 50);
        assert!(resolve_limit(Some(0), 12, 50).is_err());
    }

    #[test]
    fn test_client_id_ignores_headers_by_default() {
        let addr: SocketAddr = "203.0.113.9:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));

        assert_eq!(client_id(&headers, addr, false), "203.0.113.9");
    }

    #[test]
    fn test_client_id_trusts_first_forwarded_hop() {
        let addr: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.1, 10.0.0.1"),
        );
        assert_eq!(client_id(&headers, addr, true), "198.51.100.1");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(client_id(&headers, addr, true), "198.51.100.7");

        assert_eq!(client_id(&HeaderMap::new(), addr, true), "10.0.0.2");
    }
}
