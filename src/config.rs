use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::constants::{BROWSER_USER_AGENT, DEFAULT_API_APP_ID};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Which fetch strategy serves `POST /scrape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Render the profile page in headless Chromium and scrape it.
    Browser,
    /// Call the public JSON endpoint, degrading to a placeholder profile.
    Api,
}

impl Strategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Api => "api",
        }
    }

    /// Post limit used when a request does not name one.
    ///
    /// The JSON endpoint returns one page of twelve media edges, and twelve
    /// is also one lazy-load batch on the rendered grid.
    #[must_use]
    pub const fn default_limit(self) -> u32 {
        match self {
            Self::Browser | Self::Api => 12,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Web Server
    pub web_host: String,
    pub web_port: u16,
    pub trust_proxy_headers: bool,

    // Strategy
    pub strategy: Strategy,
    pub user_agent: String,
    pub default_post_limit: u32,
    pub max_post_limit: u32,

    // Browser strategy
    pub target_base_url: String,
    pub chrome_path: Option<String>,
    pub page_timeout: Duration,
    pub page_settle: Duration,
    pub scroll_settle: Duration,
    pub posts_per_scroll: u32,

    // API strategy
    pub api_base_url: String,
    pub api_app_id: String,
    pub api_timeout: Duration,

    // Rate limiting
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let strategy = parse_strategy(&env_or_default("SCRAPE_STRATEGY", "browser"))?;

        Ok(Self {
            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 3000)?,
            trust_proxy_headers: parse_env_bool("TRUST_PROXY_HEADERS", false)?,

            // Strategy
            strategy,
            user_agent: env_or_default("USER_AGENT", BROWSER_USER_AGENT),
            default_post_limit: parse_env_u32("DEFAULT_POST_LIMIT", strategy.default_limit())?,
            max_post_limit: parse_env_u32("MAX_POST_LIMIT", 50)?,

            // Browser strategy
            target_base_url: env_or_default("TARGET_BASE_URL", "https://www.instagram.com"),
            chrome_path: optional_env("CHROME_PATH"),
            page_timeout: Duration::from_secs(parse_env_u64("PAGE_TIMEOUT_SECS", 30)?),
            page_settle: Duration::from_millis(parse_env_u64("PAGE_SETTLE_MS", 2000)?),
            scroll_settle: Duration::from_millis(parse_env_u64("SCROLL_SETTLE_MS", 2000)?),
            posts_per_scroll: parse_env_u32("POSTS_PER_SCROLL", 12)?,

            // API strategy
            api_base_url: env_or_default("API_BASE_URL", "https://i.instagram.com"),
            api_app_id: env_or_default("API_APP_ID", DEFAULT_API_APP_ID),
            api_timeout: Duration::from_secs(parse_env_u64("API_TIMEOUT_SECS", 15)?),

            // Rate limiting
            rate_limit_max_requests: parse_env_u32("RATE_LIMIT_MAX_REQUESTS", 10)?,
            rate_limit_window: Duration::from_secs(parse_env_u64("RATE_LIMIT_WINDOW_SECS", 60)?),
        })
    }

    /// Defaults suitable for tests: api strategy, zero settle delays.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            trust_proxy_headers: false,
            strategy: Strategy::Api,
            user_agent: BROWSER_USER_AGENT.to_string(),
            default_post_limit: Strategy::Api.default_limit(),
            max_post_limit: 50,
            target_base_url: "https://www.instagram.com".to_string(),
            chrome_path: None,
            page_timeout: Duration::from_secs(30),
            page_settle: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            posts_per_scroll: 12,
            api_base_url: "https://i.instagram.com".to_string(),
            api_app_id: DEFAULT_API_APP_ID.to_string(),
            api_timeout: Duration::from_secs(15),
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_secs(60),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.posts_per_scroll == 0 {
            return Err(ConfigError::InvalidValue {
                name: "POSTS_PER_SCROLL".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_post_limit == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_POST_LIMIT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.default_post_limit == 0 || self.default_post_limit > self.max_post_limit {
            return Err(ConfigError::InvalidValue {
                name: "DEFAULT_POST_LIMIT".to_string(),
                message: format!("must be between 1 and MAX_POST_LIMIT ({})", self.max_post_limit),
            });
        }
        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_WINDOW_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        validate_url("TARGET_BASE_URL", &self.target_base_url)?;
        validate_url("API_BASE_URL", &self.api_base_url)?;
        Ok(())
    }
}

fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(())
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_strategy(value: &str) -> Result<Strategy, ConfigError> {
    match value.to_lowercase().as_str() {
        "browser" | "puppeteer" => Ok(Strategy::Browser),
        "api" | "direct" => Ok(Strategy::Api),
        _ => Err(ConfigError::InvalidValue {
            name: "SCRAPE_STRATEGY".to_string(),
            message: format!("must be 'browser' or 'api', got '{value}'"),
        }),
    }
}
