//! Shared counter cache used by the rate limiter.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tms_core::{StorageError, TmsResult};

/// Result of counting one request against a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Unix time the current window opened.
    pub window_start: i64,
    /// Requests counted in the window, including this one when allowed.
    pub count: i64,
    pub allowed: bool,
}

/// Fixed-window request counter.
///
/// `hit` opens a new window when none exists or the stored one has ended,
/// then admits the request only while the count is below `limit`. The
/// check and the increment happen as one step per key, so concurrent
/// callers never observe the same count.
#[async_trait]
pub trait RateLimitCache: Send + Sync {
    async fn hit(&self, key: &str, now: i64, interval: Duration, limit: i64)
        -> TmsResult<WindowHit>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: i64,
    count: i64,
}

/// Process-local counter. Ended windows are replaced on the next hit.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    windows: DashMap<String, Window>,
    failing: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as an unreachable cache server would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> TmsResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed {
                reason: "cache unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn interval_secs(interval: Duration) -> i64 {
    interval.as_secs().max(1) as i64
}

#[async_trait]
impl RateLimitCache for InMemoryCache {
    async fn hit(
        &self,
        key: &str,
        now: i64,
        interval: Duration,
        limit: i64,
    ) -> TmsResult<WindowHit> {
        self.check()?;
        let secs = interval_secs(interval);

        // The entry guard holds the shard lock until the end of the block.
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { start: now, count: 0 });
        if now >= window.start + secs {
            *window = Window { start: now, count: 0 };
        }

        let allowed = window.count < limit;
        if allowed {
            window.count += 1;
        }
        Ok(WindowHit {
            window_start: window.start,
            count: window.count,
            allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_window_opens_and_rolls_over() {
        let cache = InMemoryCache::new();
        let now = 1_700_000_000;

        let first = cache.hit("a", now, MINUTE, 2).await.unwrap();
        assert_eq!(first, WindowHit { window_start: now, count: 1, allowed: true });
        assert!(cache.hit("a", now + 5, MINUTE, 2).await.unwrap().allowed);

        let denied = cache.hit("a", now + 10, MINUTE, 2).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 2);
        assert_eq!(denied.window_start, now);

        let next = cache.hit("a", now + 60, MINUTE, 2).await.unwrap();
        assert_eq!(next, WindowHit { window_start: now + 60, count: 1, allowed: true });

        // Keys are independent.
        assert!(cache.hit("b", now + 10, MINUTE, 2).await.unwrap().allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_respect_limit() {
        let cache = Arc::new(InMemoryCache::new());
        let now = 1_700_000_000;

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.hit("k", now, MINUTE, 5).await.unwrap() })
            })
            .collect();

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn test_failure_switch() {
        let cache = InMemoryCache::new();
        cache.set_failing(true);
        assert!(cache.hit("a", 0, MINUTE, 1).await.is_err());
        cache.set_failing(false);
        assert!(cache.hit("a", 0, MINUTE, 1).await.is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_window_never_exceeds_limit(
            mut offsets in proptest::collection::vec(0i64..600, 1..80),
            limit in 1i64..6,
        ) {
            offsets.sort_unstable();
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let cache = InMemoryCache::new();
            let base = 1_700_000_000;

            let mut allowed_in_window = 0;
            let mut current = None;
            for offset in offsets {
                let now = base + offset;
                let hit = rt.block_on(cache.hit("k", now, MINUTE, limit)).unwrap();
                prop_assert!(hit.window_start <= now && now < hit.window_start + 60);
                prop_assert!(hit.count <= limit);
                if current != Some(hit.window_start) {
                    current = Some(hit.window_start);
                    allowed_in_window = 0;
                }
                if hit.allowed {
                    allowed_in_window += 1;
                }
                prop_assert_eq!(allowed_in_window, hit.count);
            }
        }
    }
}
