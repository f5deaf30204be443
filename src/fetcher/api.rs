//! Direct calls to the public profile JSON endpoint.
//!
//! Upstream failures never become errors here: they are folded into a
//! degraded placeholder result that is still served with 200.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::parse_base_url;
use super::traits::{
    format_timestamp, PostRecord, ProfileFetcher, ProfileInfo, ScrapeError, ScrapeOutcome, ScrapeResult,
    Source,
};
use crate::config::Config;

const PROFILE_INFO_PATH: &str = "api/v1/users/web_profile_info/";

/// Settings for the JSON endpoint client.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_base_url: Url,
    /// Base for post permalinks, e.g. `https://www.instagram.com`.
    pub permalink_base_url: Url,
    pub app_id: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl ApiSettings {
    /// Build settings from the application config.
    ///
    /// # Errors
    ///
    /// Returns an error if either base URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            api_base_url: parse_base_url(&config.api_base_url).context("Invalid API_BASE_URL")?,
            permalink_base_url: parse_base_url(&config.target_base_url)
                .context("Invalid TARGET_BASE_URL")?,
            app_id: config.api_app_id.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.api_timeout,
        })
    }
}

/// Why the endpoint could not supply data.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned {0}")]
    Status(StatusCode),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Fetcher backed by the public JSON endpoint.
#[derive(Debug, Clone)]
pub struct ApiFetcher {
    client: Client,
    settings: ApiSettings,
}

impl ApiFetcher {
    /// Create a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: ApiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, settings })
    }

    fn profile_info_url(&self, username: &str) -> Result<Url, ScrapeError> {
        let mut url = self
            .settings
            .api_base_url
            .join(PROFILE_INFO_PATH)
            .map_err(|e| ScrapeError::Request(format!("Invalid endpoint URL: {e}")))?;
        url.query_pairs_mut().append_pair("username", username);
        Ok(url)
    }

    async fn request_profile(&self, url: Url) -> Result<UserNode, UpstreamError> {
        let response = self
            .client
            .get(url)
            .header("X-IG-App-ID", &self.settings.app_id)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status));
        }

        let body = response.text().await?;
        let payload: ProfileResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;

        payload
            .data
            .and_then(|d| d.user)
            .ok_or_else(|| UpstreamError::Malformed("missing data.user".to_string()))
    }

    /// Map the provider's user node into the shared result shape.
    fn map_user(&self, user: UserNode, limit: u32) -> ScrapeResult {
        let profile = ProfileInfo {
            username: user.username,
            followers: user.edge_followed_by.map(|e| e.count.to_string()).unwrap_or_default(),
            bio: user.biography.unwrap_or_default(),
            full_name: user.full_name.unwrap_or_default(),
        };

        let posts = user
            .edge_owner_to_timeline_media
            .map(|media| media.edges)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| self.map_post(edge.node))
            .take(limit as usize)
            .collect();

        ScrapeResult::new(profile, posts, limit, Source::Api, Utc::now())
    }

    fn map_post(&self, node: MediaNode) -> Option<PostRecord> {
        let url = self
            .settings
            .permalink_base_url
            .join(&format!("p/{}/", node.shortcode))
            .ok()?;

        let caption = node
            .edge_media_to_caption
            .and_then(|c| c.edges.into_iter().next())
            .map(|e| e.node.text)
            .or(node.accessibility_caption)
            .unwrap_or_default();

        let timestamp = node
            .taken_at_timestamp
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(format_timestamp)
            .unwrap_or_default();

        let likes = node
            .edge_liked_by
            .or(node.edge_media_preview_like)
            .map(|c| c.count);

        Some(PostRecord {
            url: url.to_string(),
            image_url: node.display_url.or(node.thumbnail_src).unwrap_or_default(),
            caption,
            timestamp,
            likes,
            comments: node.edge_media_to_comment.map(|c| c.count),
            is_video: node.is_video,
        })
    }
}

#[async_trait]
impl ProfileFetcher for ApiFetcher {
    fn strategy_id(&self) -> &'static str {
        "api"
    }

    async fn fetch(&self, username: &str, limit: u32) -> ScrapeOutcome {
        let url = match self.profile_info_url(username) {
            Ok(url) => url,
            Err(e) => return ScrapeOutcome::Failed(e),
        };

        debug!(username = %username, url = %url, "Requesting profile info");
        match self.request_profile(url).await {
            Ok(user) => {
                let result = self.map_user(user, limit);
                info!(username = %username, posts = result.posts.len(), limit, "Profile fetched from API");
                ScrapeOutcome::Success(result)
            }
            Err(e) => {
                warn!(username = %username, "Profile API unavailable, serving fallback: {e}");
                ScrapeOutcome::Degraded(ScrapeResult::degraded(username, limit, e.to_string()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    data: Option<ProfileData>,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    user: Option<UserNode>,
}

#[derive(Debug, Deserialize)]
struct UserNode {
    username: String,
    full_name: Option<String>,
    biography: Option<String>,
    edge_followed_by: Option<Count>,
    edge_owner_to_timeline_media: Option<MediaConnection>,
}

#[derive(Debug, Deserialize)]
struct Count {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct MediaConnection {
    #[serde(default)]
    edges: Vec<MediaEdge>,
}

#[derive(Debug, Deserialize)]
struct MediaEdge {
    node: MediaNode,
}

#[derive(Debug, Deserialize)]
struct MediaNode {
    shortcode: String,
    display_url: Option<String>,
    thumbnail_src: Option<String>,
    is_video: Option<bool>,
    taken_at_timestamp: Option<i64>,
    accessibility_caption: Option<String>,
    edge_media_to_caption: Option<CaptionConnection>,
    edge_liked_by: Option<Count>,
    edge_media_preview_like: Option<Count>,
    edge_media_to_comment: Option<Count>,
}

#[derive(Debug, Deserialize)]
struct CaptionConnection {
    #[serde(default)]
    edges: Vec<CaptionEdge>,
}

#[derive(Debug, Deserialize)]
struct CaptionEdge {
    node: CaptionNode,
}

#[derive(Debug, Deserialize)]
struct CaptionNode {
    text: String,
}
