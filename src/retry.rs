//! Retry with exponential backoff under an outer deadline.
//!
//! Applied only to the validation runner's outermost request; individual
//! vulnerability probes are intentionally one-shot to bound time and
//! stealth.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::EngineConfig;
use crate::error::CheckError;

/// Error substrings classified as transient when no custom list is set.
const DEFAULT_RETRYABLE: &[&str] = &[
    "connection refused",
    "timed out",
    "reset",
    "eof",
    "i/o timeout",
    "no route to host",
    "temporary failure",
    "network unreachable",
    "network is unreachable",
    "host unreachable",
    "dial tcp",
    "dial udp",
    "context deadline exceeded",
];

/// Backoff schedule and error classification for the validation runner.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Additional attempts after the first.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Custom retryable substrings; empty uses the built-in list.
    retryable: Vec<String>,
}

impl RetryPolicy {
    /// Derive the policy from a normalized engine config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            enabled: config.retry_enabled,
            max_retries: config.max_retries,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff_factor: config.backoff_factor,
            retryable: config
                .retryable_errors
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// Classify an error as retryable.
    ///
    /// Three ways in: the error was flagged transient at the transport
    /// layer when it was constructed, the message matches a retryable
    /// substring, or (covered by the flag) it wraps a URL-scheme error.
    pub fn is_retryable(&self, error: &CheckError) -> bool {
        if matches!(error, CheckError::RequestFailed { transient: true, .. }) {
            return true;
        }
        let message = error.to_string().to_lowercase();
        if self.retryable.is_empty() {
            DEFAULT_RETRYABLE.iter().any(|s| message.contains(s))
        } else {
            self.retryable.iter().any(|s| message.contains(s.as_str()))
        }
    }

    /// Classify a live reqwest error as transient.
    ///
    /// Timeout and connect flags from the transport, plus wrapped
    /// URL-scheme errors anywhere in the source chain. Call this before
    /// stringifying the error; the flags do not survive `to_string`.
    pub fn is_retryable_transport(error: &reqwest::Error) -> bool {
        if error.is_timeout() || error.is_connect() || error.is_request() || error.is_builder() {
            return true;
        }
        let mut source = std::error::Error::source(error);
        while let Some(inner) = source {
            if inner.downcast_ref::<url::ParseError>().is_some() {
                return true;
            }
            source = inner.source();
        }
        false
    }

    /// Backoff before attempt `i + 1`: `min(max, initial * factor^i)`
    /// jittered uniformly within [0.75, 1.25].
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(capped * jitter)
    }

    /// Run `op` until it succeeds, the classifier declines, attempts run
    /// out, or the deadline passes.
    ///
    /// When the deadline is observed between attempts the deadline error is
    /// returned, not the last operation error.
    pub async fn execute<T, F, Fut>(&self, deadline: Duration, mut op: F) -> Result<T, CheckError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CheckError>>,
    {
        if !self.enabled {
            return op().await;
        }

        let started = Instant::now();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if started.elapsed() >= deadline {
                return Err(CheckError::DeadlineExceeded { deadline });
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let retryable = self.is_retryable(&e);
                    if !retryable || attempt == self.max_retries {
                        return Err(e);
                    }
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay,
                    );
                    last_err = Some(e);
                    if started.elapsed() + delay >= deadline {
                        return Err(CheckError::DeadlineExceeded { deadline });
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Unreachable: the loop always returns from its final attempt.
        Err(last_err.unwrap_or(CheckError::DeadlineExceeded { deadline }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
            retryable: Vec::new(),
        }
    }

    fn transient(url: &str) -> CheckError {
        // Retryable by message, not by flag, so the substring path is the
        // one these tests exercise.
        CheckError::RequestFailed {
            url: url.to_string(),
            reason: "connection refused".to_string(),
            transient: false,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = policy(3);
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = policy
            .execute(Duration::from_secs(5), || {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Err(transient("http://x"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_attempt_count_is_bounded() {
        let policy = policy(2);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(Duration::from_secs(5), || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(transient("http://x")) }
            })
            .await;

        assert!(result.is_err());
        // max_retries + 1 invocations, never more.
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let policy = policy(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(Duration::from_secs(5), || {
                calls.fetch_add(1, Ordering::Relaxed);
                async {
                    Err(CheckError::ValidationFailed {
                        reason: "status 500".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_deadline_wins_over_last_operation_error() {
        let mut policy = policy(10);
        policy.initial_delay = Duration::from_millis(50);
        policy.max_delay = Duration::from_millis(50);

        let result: Result<(), _> = policy
            .execute(Duration::from_millis(30), || async {
                Err(transient("http://x"))
            })
            .await;

        match result {
            Err(CheckError::DeadlineExceeded { .. }) => {}
            other => panic!("Expected deadline error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disabled_policy_runs_once() {
        let mut policy = policy(5);
        policy.enabled = false;
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(Duration::from_secs(5), || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(transient("http://x")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_default_classifier_matches_spec_substrings() {
        let policy = policy(1);
        for reason in ["Connection refused", "request timed out", "unexpected EOF", "dial tcp 1.2.3.4:80"] {
            let err = CheckError::RequestFailed {
                url: "http://x".to_string(),
                reason: reason.to_string(),
                transient: false,
            };
            assert!(policy.is_retryable(&err), "{reason} should be retryable");
        }

        let err = CheckError::UnexpectedStatus {
            url: "http://x".to_string(),
            status: 500,
        };
        assert!(!policy.is_retryable(&err));
    }

    #[test]
    fn test_transport_flag_retries_without_substring_match() {
        let policy = policy(1);

        // A connect-layer DNS failure carries no retryable substring; the
        // flag set at construction time must carry it through.
        let flagged = CheckError::RequestFailed {
            url: "http://x".to_string(),
            reason: "dns error: failed to lookup address information".to_string(),
            transient: true,
        };
        let unflagged = CheckError::RequestFailed {
            url: "http://x".to_string(),
            reason: "dns error: failed to lookup address information".to_string(),
            transient: false,
        };

        assert!(policy.is_retryable(&flagged));
        assert!(!policy.is_retryable(&unflagged));
    }

    #[test]
    fn test_transport_flag_overrides_custom_substring_list() {
        let mut policy = policy(1);
        policy.retryable = vec!["flaky backend".to_string()];

        let flagged = CheckError::RequestFailed {
            url: "http://x".to_string(),
            reason: "something else entirely".to_string(),
            transient: true,
        };
        assert!(policy.is_retryable(&flagged));
    }

    #[test]
    fn test_custom_substrings_replace_defaults() {
        let mut policy = policy(1);
        policy.retryable = vec!["flaky backend".to_string()];

        let custom = CheckError::RequestFailed {
            url: "http://x".to_string(),
            reason: "flaky backend hiccup".to_string(),
            transient: false,
        };
        let default_only = transient("http://x");

        assert!(policy.is_retryable(&custom));
        assert!(!policy.is_retryable(&default_only));
    }

    #[test]
    fn test_delay_respects_cap_and_jitter_band() {
        let policy = RetryPolicy {
            enabled: true,
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retryable: Vec::new(),
        };

        for attempt in 0..12 {
            let d = policy.delay(attempt).as_secs_f64();
            let nominal = (2.0f64.powi(attempt as i32)).min(30.0);
            assert!(d >= nominal * 0.75 - f64::EPSILON, "attempt {attempt}: {d}");
            assert!(d <= nominal * 1.25 + f64::EPSILON, "attempt {attempt}: {d}");
        }
    }
}
