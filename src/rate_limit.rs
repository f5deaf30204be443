//! Per-client sliding-window rate limiting.
//!
//! The limiter itself only knows about a [`RateLimitStore`]; the in-memory
//! store is the default backing and the one used in tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Backing store for request windows.
///
/// `check` must record the request when it returns `true` and must leave the
/// window untouched when it returns `false`. The read-modify-write for one
/// client has to be atomic with respect to concurrent calls for that client.
pub trait RateLimitStore: Send + Sync {
    /// Returns `true` if the request from `client_id` at `now` is allowed.
    fn check(&self, client_id: &str, now: Instant) -> bool;

    /// Drop clients with no requests inside the window. Returns how many were removed.
    fn sweep(&self, _now: Instant) -> usize {
        0
    }
}

/// In-memory store keeping the request instants of each client in order.
#[derive(Debug)]
pub struct InMemoryStore {
    max_requests: usize,
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            windows: DashMap::new(),
        }
    }

    /// Number of clients currently tracked.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.windows.len()
    }

    fn evict_expired(window: Duration, hits: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = hits.front() {
            if now.saturating_duration_since(oldest) >= window {
                hits.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimitStore for InMemoryStore {
    fn check(&self, client_id: &str, now: Instant) -> bool {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut hits = self.windows.entry(client_id.to_string()).or_default();
        Self::evict_expired(self.window, &mut hits, now);

        if hits.len() >= self.max_requests {
            return false;
        }

        hits.push_back(now);
        true
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let window = self.window;
        self.windows.retain(|_, hits| {
            Self::evict_expired(window, hits, now);
            !hits.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }
}

/// Rate limiter shared by every request handler.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter over an in-memory store. `max_requests = 0` disables limiting.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_store(
            Arc::new(InMemoryStore::new(max_requests, window)),
            max_requests,
            window,
        )
    }

    /// Create a limiter over a caller-supplied store.
    #[must_use]
    pub fn with_store(store: Arc<dyn RateLimitStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` if `client_id` may make another request now.
    #[must_use]
    pub fn allow(&self, client_id: &str) -> bool {
        self.allow_at(client_id, Instant::now())
    }

    /// Same as [`allow`](Self::allow) with an explicit clock reading.
    #[must_use]
    pub fn allow_at(&self, client_id: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.store.check(client_id, now)
    }

    /// Periodically drop idle clients so the map does not grow without bound.
    pub async fn run_sweeper(self) {
        let mut ticker = tokio::time::interval(self.window);
        loop {
            ticker.tick().await;
            let removed = self.store.sweep(Instant::now());
            if removed > 0 {
                debug!(removed, "Swept idle rate limit windows");
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(10, WINDOW);
        let start = Instant::now();

        for i in 0..10 {
            assert!(
                limiter.allow_at("10.0.0.1", start + Duration::from_millis(i * 100)),
                "request {i} should be allowed"
            );
        }
        assert!(!limiter.allow_at("10.0.0.1", start + Duration::from_secs(5)));
    }

    #[test]
    fn test_window_elapses() {
        let limiter = RateLimiter::new(10, WINDOW);
        let start = Instant::now();

        for _ in 0..10 {
            assert!(limiter.allow_at("10.0.0.1", start));
        }
        assert!(!limiter.allow_at("10.0.0.1", start + Duration::from_secs(59)));
        assert!(limiter.allow_at("10.0.0.1", start + WINDOW));
    }

    #[test]
    fn test_rejection_is_not_recorded() {
        let limiter = RateLimiter::new(2, WINDOW);
        let start = Instant::now();

        assert!(limiter.allow_at("a", start));
        assert!(limiter.allow_at("a", start + Duration::from_secs(30)));
        // Rejected attempts must not push the window forward
        assert!(!limiter.allow_at("a", start + Duration::from_secs(40)));
        assert!(!limiter.allow_at("a", start + Duration::from_secs(50)));
        // First hit has expired, second is still live
        assert!(limiter.allow_at("a", start + Duration::from_secs(61)));
        assert!(!limiter.allow_at("a", start + Duration::from_secs(62)));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1, WINDOW);
        let now = Instant::now();

        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
    }

    #[test]
    fn test_zero_max_disables() {
        let limiter = RateLimiter::new(0, WINDOW);
        let now = Instant::now();
        assert!(!limiter.is_enabled());
        for _ in 0..100 {
            assert!(limiter.allow_at("a", now));
        }
    }

    #[test]
    fn test_sweep_removes_idle_clients() {
        let store = InMemoryStore::new(5, WINDOW);
        let start = Instant::now();

        assert!(store.check("old", start));
        assert!(store.check("fresh", start + Duration::from_secs(50)));
        assert_eq!(store.client_count(), 2);

        let removed = store.sweep(start + Duration::from_secs(70));
        assert_eq!(removed, 1);
        assert_eq!(store.client_count(), 1);
    }

    #[test]
    fn test_concurrent_requests_are_not_undercounted() {
        let limiter = RateLimiter::new(10, WINDOW);
        let now = Instant::now();

        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    s.spawn(move || (0..5).filter(|_| limiter.allow_at("shared", now)).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 10);
    }

    struct DenyAll;

    impl RateLimitStore for DenyAll {
        fn check(&self, _client_id: &str, _now: Instant) -> bool {
            false
        }
    }

    #[test]
    fn test_custom_store() {
        let limiter = RateLimiter::with_store(Arc::new(DenyAll), 10, WINDOW);
        assert!(!limiter.allow("anyone"));
    }
}
