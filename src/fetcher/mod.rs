//! Profile fetch strategies.

pub mod api;
pub mod browser;
pub mod collector;
pub mod rules;
mod traits;

use std::sync::Arc;

use anyhow::Result;
use url::Url;

pub use api::{ApiFetcher, ApiSettings};
pub use browser::{BrowserFetcher, BrowserSettings};
pub use traits::{
    format_timestamp, PostRecord, ProfileFetcher, ProfileInfo, ScrapeError, ScrapeMetadata,
    ScrapeOutcome, ScrapeResult, Source,
};

use crate::config::{Config, Strategy};

/// Build the fetcher selected by `SCRAPE_STRATEGY`.
///
/// # Errors
///
/// Returns an error if the strategy's settings are invalid.
pub fn from_config(config: &Config) -> Result<Arc<dyn ProfileFetcher>> {
    Ok(match config.strategy {
        Strategy::Browser => Arc::new(BrowserFetcher::new(BrowserSettings::from_config(config)?)),
        Strategy::Api => Arc::new(ApiFetcher::new(ApiSettings::from_config(config)?)?),
    })
}

/// Parse a configured base URL so that relative joins extend its path.
///
/// `Url::join` replaces the last path segment unless the base ends in `/`, so
/// `https://host/proxy` is treated as `https://host/proxy/`.
///
/// # Errors
///
/// Returns an error if `raw` is not an absolute URL.
pub fn parse_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
