//! Bounded, deduplicating post collection over a lazily loading feed.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::traits::PostRecord;

/// A feed that reveals more posts each time it is asked to load more.
#[async_trait]
pub trait FeedSource: Send {
    /// Every post currently visible, in display order. May repeat earlier ones.
    async fn visible_posts(&mut self) -> Result<Vec<PostRecord>>;

    /// Trigger the next incremental load (scroll to the bottom).
    async fn load_more(&mut self) -> Result<()>;
}

/// Scroll policy for [`collect_posts`].
#[derive(Debug, Clone, Copy)]
pub struct CollectPolicy {
    /// Posts assumed to appear per incremental load; sets the scroll budget.
    pub posts_per_load: u32,
    /// Wait after each load for lazy content to render.
    pub settle: Duration,
}

impl CollectPolicy {
    /// Number of loads allowed for `limit` posts: `ceil(limit / posts_per_load)`.
    #[must_use]
    pub fn load_budget(&self, limit: u32) -> u32 {
        limit.div_ceil(self.posts_per_load.max(1))
    }
}

/// Collect up to `limit` posts with unique URLs from `feed`.
///
/// Stops once `limit` posts are held or the load budget is spent; running out
/// of budget is not an error. First-seen order is kept.
///
/// # Errors
///
/// Any feed error aborts collection; posts gathered so far are dropped.
pub async fn collect_posts<F>(feed: &mut F, limit: u32, policy: CollectPolicy) -> Result<Vec<PostRecord>>
where
    F: FeedSource + ?Sized,
{
    let limit_len = limit as usize;
    let budget = policy.load_budget(limit);
    let mut posts: Vec<PostRecord> = Vec::with_capacity(limit_len);
    let mut attempts = 0u32;
    let mut harvested_last_load = true;

    while posts.len() < limit_len && attempts < budget {
        harvest(feed, &mut posts, limit_len).await?;
        harvested_last_load = true;

        if posts.len() < limit_len {
            feed.load_more().await?;
            tokio::time::sleep(policy.settle).await;
            attempts += 1;
            harvested_last_load = false;
            debug!(collected = posts.len(), attempts, budget, "Loaded more posts");
        }
    }

    // Read what the final load revealed before giving up.
    if !harvested_last_load && posts.len() < limit_len {
        harvest(feed, &mut posts, limit_len).await?;
    }

    posts.truncate(limit_len);
    Ok(posts)
}

async fn harvest<F>(feed: &mut F, posts: &mut Vec<PostRecord>, limit: usize) -> Result<()>
where
    F: FeedSource + ?Sized,
{
    for candidate in feed.visible_posts().await? {
        if posts.len() >= limit {
            break;
        }
        if posts.iter().any(|p| p.url == candidate.url) {
            continue;
        }
        posts.push(candidate);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    /// Feed that reveals `batch` more posts per load out of `total`,
    /// re-listing everything already shown.
    struct FakeFeed {
        total: usize,
        batch: usize,
        shown: usize,
        loads: u32,
        fail_on_load: Option<u32>,
    }

    impl FakeFeed {
        fn new(total: usize, batch: usize) -> Self {
            Self {
                total,
                batch,
                shown: batch.min(total),
                loads: 0,
                fail_on_load: None,
            }
        }
    }

    #[async_trait]
    impl FeedSource for FakeFeed {
        async fn visible_posts(&mut self) -> Result<Vec<PostRecord>> {
            Ok((0..self.shown)
                .map(|i| PostRecord {
                    url: format!("https://www.instagram.com/p/{i}/"),
                    ..PostRecord::default()
                })
                .collect())
        }

        async fn load_more(&mut self) -> Result<()> {
            self.loads += 1;
            if self.fail_on_load == Some(self.loads) {
                anyhow::bail!("page crashed");
            }
            self.shown = (self.shown + self.batch).min(self.total);
            Ok(())
        }
    }

    fn policy(posts_per_load: u32) -> CollectPolicy {
        CollectPolicy {
            posts_per_load,
            settle: Duration::ZERO,
        }
    }

    fn assert_unique(posts: &[PostRecord]) {
        let urls: HashSet<_> = posts.iter().map(|p| &p.url).collect();
        assert_eq!(urls.len(), posts.len(), "duplicate URLs returned");
    }

    #[test]
    fn test_load_budget() {
        assert_eq!(policy(12).load_budget(1), 1);
        assert_eq!(policy(12).load_budget(12), 1);
        assert_eq!(policy(12).load_budget(13), 2);
        assert_eq!(policy(12).load_budget(50), 5);
        assert_eq!(policy(0).load_budget(3), 3);
    }

    #[tokio::test]
    async fn test_stops_at_limit_without_scrolling() {
        let mut feed = FakeFeed::new(5, 5);
        let posts = collect_posts(&mut feed, 3, policy(12)).await.unwrap();

        assert_eq!(posts.len(), 3);
        assert_eq!(feed.loads, 0);
        assert_unique(&posts);
        assert_eq!(posts[0].url, "https://www.instagram.com/p/0/");
    }

    #[tokio::test]
    async fn test_dedups_across_loads() {
        // Every load re-lists earlier posts
        let mut feed = FakeFeed::new(100, 4);
        let posts = collect_posts(&mut feed, 10, policy(4)).await.unwrap();

        assert_eq!(posts.len(), 10);
        assert_unique(&posts);
        // 4 visible, then 8, then 12: two loads are enough
        assert_eq!(feed.loads, 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_best_effort() {
        // Feed is slower than the assumed page size
        let mut feed = FakeFeed::new(100, 2);
        let posts = collect_posts(&mut feed, 12, policy(12)).await.unwrap();

        assert_eq!(feed.loads, 1);
        // Initial 2 plus the 2 revealed by the single allowed load
        assert_eq!(posts.len(), 4);
        assert_unique(&posts);
    }

    #[tokio::test]
    async fn test_short_feed_returns_everything() {
        let mut feed = FakeFeed::new(3, 12);
        let posts = collect_posts(&mut feed, 12, policy(12)).await.unwrap();
        assert_eq!(posts.len(), 3);
    }

    #[tokio::test]
    async fn test_load_failure_aborts() {
        let mut feed = FakeFeed::new(100, 2);
        feed.fail_on_load = Some(1);
        let result = collect_posts(&mut feed, 10, policy(2)).await;
        assert!(result.is_err());
    }
}
