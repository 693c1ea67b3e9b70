//! Minimum-interval request pacing.
//!
//! Keys requests by proxy URL, target host, or a global bucket and
//! enforces a configurable minimum spacing per key. One instance lives in
//! the engine and is shared by every concurrent `check` call.
//!
//! The key map grows by one entry per distinct key and is never pruned;
//! callers are long-running services with bounded key cardinality, and
//! evicting an entry could let the next request through early.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Pacing configuration, derived from the engine config.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Minimum spacing between requests sharing a key.
    pub delay: Duration,
    /// Key by target hostname.
    pub per_host: bool,
    /// Key by full proxy URL; takes priority over per-host.
    pub per_proxy: bool,
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            delay: Duration::ZERO,
            per_host: false,
            per_proxy: false,
        }
    }
}

/// Keyed minimum-interval rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Select the pacing key for a request.
    ///
    /// Priority: full proxy URL when per-proxy pacing is on and a proxy is
    /// in play, then the target hostname, then the global bucket.
    fn key_for(&self, proxy_url: Option<&str>, target_host: &str) -> String {
        if self.config.per_proxy
            && let Some(proxy) = proxy_url
        {
            return proxy.to_string();
        }
        if self.config.per_host {
            return target_host.to_string();
        }
        "global".to_string()
    }

    /// Block until a request for the given key may proceed, then claim the
    /// slot.
    ///
    /// The sleep happens outside the lock; the timestamp is re-read after
    /// re-acquisition so two waiters for the same key cannot both go early.
    pub async fn acquire(&self, proxy_url: Option<&str>, target_host: &str) {
        if !self.config.enabled || self.config.delay.is_zero() {
            return;
        }

        let key = self.key_for(proxy_url, target_host);
        loop {
            let wait = {
                let mut last = self.last_request.lock().await;
                match last.get(&key) {
                    Some(prev) => {
                        let since = prev.elapsed();
                        if since >= self.config.delay {
                            last.insert(key.clone(), Instant::now());
                            return;
                        }
                        self.config.delay - since
                    }
                    None => {
                        last.insert(key.clone(), Instant::now());
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of distinct keys seen so far.
    pub async fn key_count(&self) -> usize {
        self.last_request.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(delay_ms: u64, per_host: bool, per_proxy: bool) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            delay: Duration::from_millis(delay_ms),
            per_host,
            per_proxy,
        })
    }

    #[tokio::test]
    async fn test_consecutive_acquisitions_are_spaced() {
        let limiter = limiter(50, true, false);

        let start = Instant::now();
        limiter.acquire(None, "example.com").await;
        limiter.acquire(None, "example.com").await;

        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_distinct_hosts_do_not_wait_on_each_other() {
        let limiter = limiter(200, true, false);

        let start = Instant::now();
        limiter.acquire(None, "a.example.com").await;
        limiter.acquire(None, "b.example.com").await;

        // Second host has its own bucket; no 200ms pause.
        assert!(start.elapsed() < Duration::from_millis(150));
        assert_eq!(limiter.key_count().await, 2);
    }

    #[tokio::test]
    async fn test_per_proxy_key_takes_priority() {
        let limiter = limiter(10, true, true);
        limiter.acquire(Some("http://p1:8080"), "example.com").await;
        limiter.acquire(Some("http://p2:8080"), "example.com").await;

        // Two proxy-URL keys, not one host key.
        assert_eq!(limiter.key_count().await, 2);
    }

    #[tokio::test]
    async fn test_global_bucket_when_no_policy_selected() {
        let limiter = limiter(10, false, false);
        limiter.acquire(None, "a").await;
        limiter.acquire(Some("http://p:1"), "b").await;
        assert_eq!(limiter.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_disabled_is_a_no_op() {
        let limiter = RateLimiter::new(RateLimitConfig::disabled());
        let start = Instant::now();
        for _ in 0..20 {
            limiter.acquire(None, "example.com").await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(limiter.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_key_map_grows_monotonically() {
        let limiter = limiter(1, true, false);
        for i in 0..10 {
            limiter.acquire(None, &format!("host{i}")).await;
        }
        assert_eq!(limiter.key_count().await, 10);
        // Revisiting a host does not shrink or grow the map.
        limiter.acquire(None, "host0").await;
        assert_eq!(limiter.key_count().await, 10);
    }
}
