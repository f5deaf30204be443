//! Rendered extraction using headless Chrome/Chromium.
//!
//! Every request gets its own browser process and page. The session is closed
//! on every exit path, including extraction errors.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures_util::StreamExt;
use scraper::Html;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::collector::{collect_posts, CollectPolicy, FeedSource};
use super::parse_base_url;
use super::rules::{extract_post_links, extract_profile, is_not_found_page};
use super::traits::{
    format_timestamp, PostRecord, ProfileFetcher, ScrapeError, ScrapeOutcome, ScrapeResult, Source,
};
use crate::config::Config;
use crate::constants::{VIEWPORT_HEIGHT, VIEWPORT_WIDTH};

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Browser session settings.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub base_url: Url,
    pub user_agent: String,
    pub chrome_path: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Upper bound on navigation to the profile page.
    pub page_timeout: Duration,
    /// Fixed wait after navigation before the first snapshot.
    pub page_settle: Duration,
    pub collect: CollectPolicy,
}

impl BrowserSettings {
    /// Build settings from the application config.
    ///
    /// # Errors
    ///
    /// Returns an error if `TARGET_BASE_URL` is not a valid URL.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(&config.target_base_url).context("Invalid TARGET_BASE_URL")?,
            user_agent: config.user_agent.clone(),
            chrome_path: config.chrome_path.clone(),
            viewport_width: VIEWPORT_WIDTH,
            viewport_height: VIEWPORT_HEIGHT,
            page_timeout: config.page_timeout,
            page_settle: config.page_settle,
            collect: CollectPolicy {
                posts_per_load: config.posts_per_scroll,
                settle: config.scroll_settle,
            },
        })
    }

    /// Profile page URL, e.g. `https://www.instagram.com/nasa/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the username does not form a valid path segment.
    pub fn profile_url(&self, username: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{username}/"))
            .with_context(|| format!("Invalid profile path for {username}"))
    }
}

/// Fetcher that renders the profile page and scrapes it.
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    settings: BrowserSettings,
}

impl BrowserFetcher {
    #[must_use]
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    async fn scrape_in_session(
        &self,
        page: &Page,
        username: &str,
        limit: u32,
    ) -> Result<ScrapeResult, ScrapeError> {
        let url = self
            .settings
            .profile_url(username)
            .map_err(|e| ScrapeError::Navigation(format!("{e:#}")))?;

        debug!(url = %url, "Navigating to profile");
        match tokio::time::timeout(self.settings.page_timeout, page.goto(url.to_string())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ScrapeError::Navigation(e.to_string())),
            Err(_) => {
                return Err(ScrapeError::Navigation(format!(
                    "timed out after {}s loading {url}",
                    self.settings.page_timeout.as_secs()
                )))
            }
        }
        tokio::time::sleep(self.settings.page_settle).await;

        let html = page
            .content()
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to read page content: {e}")))?;

        let profile = {
            let document = Html::parse_document(&html);
            if is_not_found_page(&document) {
                info!(username = %username, "Profile page not available");
                return Err(ScrapeError::NotFound(username.to_string()));
            }
            extract_profile(&document, username)
        };

        let scraped_at = Utc::now();
        let mut feed = PageFeed {
            page,
            base_url: &self.settings.base_url,
            timestamp: format_timestamp(scraped_at),
        };
        let posts = collect_posts(&mut feed, limit, self.settings.collect)
            .await
            .map_err(|e| ScrapeError::Browser(format!("{e:#}")))?;

        info!(username = %username, posts = posts.len(), limit, "Rendered profile scraped");
        Ok(ScrapeResult::new(profile, posts, limit, Source::Browser, scraped_at))
    }
}

#[async_trait]
impl ProfileFetcher for BrowserFetcher {
    fn strategy_id(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, username: &str, limit: u32) -> ScrapeOutcome {
        let session = match Session::open(&self.settings).await {
            Ok(session) => session,
            Err(e) => return ScrapeOutcome::Failed(ScrapeError::Browser(format!("{e:#}"))),
        };

        let result = self.scrape_in_session(&session.page, username, limit).await;
        session.close().await;

        match result {
            Ok(result) => ScrapeOutcome::Success(result),
            Err(e) => ScrapeOutcome::Failed(e),
        }
    }
}

/// One browser process with a single page.
struct Session {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl Session {
    async fn open(settings: &BrowserSettings) -> Result<Self> {
        let browser_config = browser_config(settings)?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = match Self::new_page(&browser, &settings.user_agent).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    warn!("Failed to close browser: {close_err}");
                }
                handler_task.abort();
                return Err(e);
            }
        };

        Ok(Self {
            browser,
            page,
            handler_task,
        })
    }

    async fn new_page(browser: &Browser, user_agent: &str) -> Result<Page> {
        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to create new page")?;
        page.set_user_agent(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .context("Failed to set user agent")?;
        Ok(page)
    }

    async fn close(mut self) {
        if let Err(e) = self.page.close().await {
            warn!("Failed to close page: {e}");
        }
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {e}");
        } else if let Err(e) = self.browser.wait().await {
            warn!("Failed to reap browser process: {e}");
        }
        self.handler_task.abort();
    }
}

/// Launch flags plus a page viewport matching the window size.
///
/// Without an explicit viewport chromiumoxide emulates 800x600 on every page,
/// which changes how many grid rows a scroll reveals.
fn browser_config(settings: &BrowserSettings) -> Result<BrowserConfig> {
    let mut config_builder = BrowserConfig::builder()
        .window_size(settings.viewport_width, settings.viewport_height)
        .viewport(Viewport {
            width: settings.viewport_width,
            height: settings.viewport_height,
            ..Viewport::default()
        })
        .request_timeout(settings.page_timeout)
        .no_sandbox()
        .disable_default_args()
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-software-rasterizer")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--disable-extensions")
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--mute-audio");

    if let Some(ref chrome_path) = settings.chrome_path {
        config_builder = config_builder.chrome_executable(chrome_path);
    }

    config_builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))
}

/// The profile grid of an open page, read through HTML snapshots.
struct PageFeed<'a> {
    page: &'a Page,
    base_url: &'a Url,
    timestamp: String,
}

#[async_trait]
impl FeedSource for PageFeed<'_> {
    async fn visible_posts(&mut self) -> Result<Vec<PostRecord>> {
        let html = self
            .page
            .content()
            .await
            .context("Failed to read page content")?;
        let document = Html::parse_document(&html);
        Ok(extract_post_links(&document, self.base_url, &self.timestamp))
    }

    async fn load_more(&mut self) -> Result<()> {
        self.page
            .evaluate(SCROLL_TO_BOTTOM)
            .await
            .context("Failed to scroll")?;
        Ok(())
    }
}
