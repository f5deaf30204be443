use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

/// Profile fields shared by every strategy. Empty strings mean "not found".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub username: String,
    /// Follower count as the site displays it (e.g. "1.2M").
    pub followers: String,
    pub bio: String,
    pub full_name: String,
}

/// One post from the profile feed. `url` is unique within a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    /// Permalink of the post.
    pub url: String,
    pub image_url: String,
    /// Caption text, or the image alt text when no caption is available.
    pub caption: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_video: Option<bool>,
}

/// Where the data in a [`ScrapeResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Browser,
    Api,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeMetadata {
    pub scraped_at: String,
    pub total_posts: usize,
    pub requested_limit: u32,
    pub source: Source,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Response body of a successful scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeResult {
    pub profile: ProfileInfo,
    pub posts: Vec<PostRecord>,
    pub metadata: ScrapeMetadata,
}

impl ScrapeResult {
    /// Assemble a full result, truncating `posts` to `limit`.
    #[must_use]
    pub fn new(
        profile: ProfileInfo,
        mut posts: Vec<PostRecord>,
        limit: u32,
        source: Source,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        posts.truncate(limit as usize);
        Self {
            metadata: ScrapeMetadata {
                scraped_at: format_timestamp(scraped_at),
                total_posts: posts.len(),
                requested_limit: limit,
                source,
                degraded: false,
                note: None,
            },
            profile,
            posts,
        }
    }

    /// Placeholder result for when the richer data source is unavailable.
    #[must_use]
    pub fn degraded(username: &str, limit: u32, note: impl Into<String>) -> Self {
        Self {
            profile: ProfileInfo {
                username: username.to_string(),
                followers: "N/A".to_string(),
                bio: "Profile data temporarily unavailable".to_string(),
                full_name: String::new(),
            },
            posts: Vec::new(),
            metadata: ScrapeMetadata {
                scraped_at: format_timestamp(Utc::now()),
                total_posts: 0,
                requested_limit: limit,
                source: Source::Fallback,
                degraded: true,
                note: Some(note.into()),
            },
        }
    }
}

#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Errors a fetcher can report as a hard failure.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("request error: {0}")]
    Request(String),
}

/// Result of one fetch. Degraded results are still served with 200.
#[derive(Debug)]
pub enum ScrapeOutcome {
    Success(ScrapeResult),
    Degraded(ScrapeResult),
    Failed(ScrapeError),
}

impl ScrapeOutcome {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// A strategy that turns a username into profile data.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// Identifier reported on `GET /`.
    fn strategy_id(&self) -> &'static str;

    /// Fetch the profile and at most `limit` posts for `username`.
    ///
    /// `username` has already been validated; `limit` is at least 1.
    async fn fetch(&self, username: &str, limit: u32) -> ScrapeOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(n: usize) -> PostRecord {
        PostRecord {
            url: format!("https://www.instagram.com/p/{n}/"),
            ..PostRecord::default()
        }
    }

    #[test]
    fn test_new_truncates_and_counts() {
        let posts = (0..5).map(post).collect();
        let result = ScrapeResult::new(ProfileInfo::default(), posts, 3, Source::Browser, Utc::now());
        assert_eq!(result.posts.len(), 3);
        assert_eq!(result.metadata.total_posts, 3);
        assert_eq!(result.metadata.requested_limit, 3);
        assert!(!result.metadata.degraded);
    }

    #[test]
    fn test_degraded_shape() {
        let result = ScrapeResult::degraded("nasa", 12, "upstream returned 401");
        assert_eq!(result.profile.username, "nasa");
        assert!(result.posts.is_empty());
        assert_eq!(result.metadata.source, Source::Fallback);
        assert!(result.metadata.degraded);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["metadata"]["source"], "fallback");
        assert_eq!(json["metadata"]["totalPosts"], 0);
        assert_eq!(json["posts"], serde_json::json!([]));
        assert_eq!(json["profile"]["fullName"], "");
    }

    #[test]
    fn test_post_serialization_skips_missing_counts() {
        let json = serde_json::to_value(post(1)).unwrap();
        assert!(json.get("likes").is_none());
        assert!(json.get("imageUrl").is_some());
    }
}
