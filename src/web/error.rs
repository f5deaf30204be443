use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::fetcher::ScrapeError;

/// Errors returned to HTTP clients as `{error, message?, username?}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Profile not found")]
    NotFound { username: String },
    #[error("Too many requests")]
    RateLimited { max_requests: u32, window_secs: u64 },
    #[error("Failed to scrape profile")]
    Scrape { username: String, source: ScrapeError },
}

impl ApiError {
    /// Map a fetcher failure for `username` to its HTTP error.
    #[must_use]
    pub fn from_scrape(username: &str, err: ScrapeError) -> Self {
        match err {
            ScrapeError::NotFound(_) => Self::NotFound {
                username: username.to_string(),
            },
            other => Self::Scrape {
                username: username.to_string(),
                source: other,
            },
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Scrape { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();

        match self {
            Self::Validation(_) => (
                status,
                Json(ErrorBody {
                    error,
                    message: None,
                    username: None,
                }),
            )
                .into_response(),
            Self::NotFound { username } => (
                status,
                Json(ErrorBody {
                    error,
                    message: Some(format!("No profile exists for username '{username}'")),
                    username: Some(username),
                }),
            )
                .into_response(),
            Self::RateLimited {
                max_requests,
                window_secs,
            } => (
                status,
                [(header::RETRY_AFTER, window_secs.to_string())],
                Json(ErrorBody {
                    error,
                    message: Some(format!(
                        "Rate limit of {max_requests} requests per {window_secs} seconds exceeded. Try again later."
                    )),
                    username: None,
                }),
            )
                .into_response(),
            Self::Scrape { username, source } => (
                status,
                Json(ErrorBody {
                    error,
                    message: Some(source.to_string()),
                    username: Some(username),
                }),
            )
                .into_response(),
        }
    }
}
