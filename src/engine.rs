//! The per-proxy probing engine.
//!
//! `Engine::check` drives one proxy through the phase machine: parse,
//! type detection, validation, the vulnerability catalogue, anonymity and
//! fingerprinting, with the direct-scan fallback replacing the proxy path
//! when detection fails. Transitions are unconditional-forward; per-probe
//! failures are recorded and never abort later phases. Every failure mode
//! returns a populated `ProxyResult`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::client::{ClientFactory, ConnectionPool, ProxyEndpoint, TLS_WARNING, DIGEST_WARNING};
use crate::config::{AuthMethod, EngineConfig};
use crate::detect;
use crate::directscan;
use crate::error::CheckError;
use crate::oracle::OracleHandle;
use crate::probe::{self, ProbeContext, host_of};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::report::{CheckResult, ProxyResult};
use crate::retry::RetryPolicy;
use crate::validate::validate_response;

/// Caller-facing progress sink. One line per phase milestone.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
}

/// Default logger that forwards to tracing.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Long-lived probing engine. Safe to share across tasks; each `check`
/// call assembles its own `ProxyResult` and the only shared mutable state
/// is the rate-limiter map.
pub struct Engine {
    config: EngineConfig,
    debug: bool,
    logger: Arc<dyn Logger>,
    factory: ClientFactory,
    limiter: RateLimiter,
    retry: RetryPolicy,
    oracle: Option<OracleHandle>,
}

impl Engine {
    /// Build an engine from a configuration.
    ///
    /// Normalizes the config, derives the retry policy, and registers with
    /// the interaction oracle when one is configured; oracle failure is
    /// non-fatal and downgrades the OOB families to their basic variants.
    pub async fn new(
        config: EngineConfig,
        debug: bool,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, CheckError> {
        Self::with_pool(config, debug, logger, None).await
    }

    /// `new`, with a caller-provided client pool preferred over the
    /// built-in factory.
    pub async fn with_pool(
        config: EngineConfig,
        debug: bool,
        logger: Arc<dyn Logger>,
        pool: Option<Arc<dyn ConnectionPool>>,
    ) -> Result<Self, CheckError> {
        let config = config.normalized();
        let factory = ClientFactory::new(&config, pool);
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: config.rate_limit_enabled,
            delay: config.rate_limit_delay,
            per_host: config.rate_limit_per_host,
            per_proxy: config.rate_limit_per_proxy,
        });
        let retry = RetryPolicy::from_config(&config);

        let oracle = if !config.interactsh_url.is_empty() && !config.advanced.disable_interactsh {
            match OracleHandle::connect(&config.interactsh_url, config.interactsh_token.as_ref())
                .await
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!("Interaction oracle unavailable, using basic variants: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            debug,
            logger,
            factory,
            limiter,
            retry,
            oracle,
        })
    }

    /// Engine configuration after normalization. Read-only.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop the oracle's background polling.
    pub fn close(&self) {
        if let Some(oracle) = &self.oracle {
            oracle.close();
        }
    }

    fn trace(&self, result: &mut ProxyResult, line: &str) {
        if self.debug {
            result.trace(line);
        }
    }

    /// Probe one proxy end to end.
    pub async fn check(&self, proxy_url: &str) -> ProxyResult {
        let mut result = ProxyResult::new(proxy_url);
        self.logger.info(&format!("checking {proxy_url}"));

        // Parse.
        let endpoint = match ProxyEndpoint::parse(proxy_url) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                result.error = Some(e.to_string());
                self.trace(&mut result, &format!("parse failed: {e}"));
                return result;
            }
        };
        self.trace(
            &mut result,
            &format!(
                "parsed endpoint host={} port={:?} scheme={:?}",
                endpoint.host, endpoint.port, endpoint.scheme
            ),
        );

        if self.config.use_rdns {
            result.rdns = reverse_lookup(&endpoint.host).await;
        }

        let auth = endpoint.resolve_auth(&self.config);
        if auth
            .as_ref()
            .is_some_and(|a| a.method == AuthMethod::Digest)
        {
            result.push_warning(DIGEST_WARNING);
        }

        // Detect.
        let detection = match detect::detect(
            &endpoint,
            auth.as_ref(),
            &self.factory,
            &self.config,
            &self.limiter,
            &mut result,
        )
        .await
        {
            Ok(detection) => {
                result.push_warning(TLS_WARNING);
                detection
            }
            Err(e) => {
                result.error = Some(e.to_string());
                self.trace(&mut result, &format!("type detection failed: {e}"));
                if self.config.advanced.any_enabled() {
                    self.trace(&mut result, "falling back to direct scan");
                    directscan::run(
                        &endpoint,
                        &self.factory,
                        &self.config,
                        &self.limiter,
                        self.oracle.as_ref(),
                        &mut result,
                    )
                    .await;
                }
                return result;
            }
        };

        result.kind = detection.kind;
        result.supports_http = detection.supports_http;
        result.supports_https = detection.supports_https;
        result.supports_http2 = matches!(detection.kind, crate::report::ProxyKind::Http2);
        result.supports_http3 = matches!(detection.kind, crate::report::ProxyKind::Http3);
        self.trace(&mut result, &format!("detected kind {}", detection.kind));

        let proxy_url_full = self
            .factory
            .proxy_url(&endpoint, detection.scheme, auth.as_ref());

        // Validate.
        match self
            .run_validation(&detection.client, &proxy_url_full, &mut result)
            .await
        {
            Ok(elapsed_ms) => {
                result.working = true;
                result.latency_ms = Some(elapsed_ms);
                self.trace(&mut result, "validation passed");
            }
            Err(e) => {
                let classified = match e {
                    CheckError::ValidationFailed { .. } => e,
                    other => CheckError::ValidationFailed {
                        reason: other.to_string(),
                    },
                };
                self.trace(&mut result, &format!("{classified}"));
                result.error = Some(classified.to_string());
            }
        }

        // Advanced catalogue.
        if self.config.advanced.any_enabled() {
            self.trace(&mut result, "running vulnerability catalogue");
            let redirect_client = self
                .factory
                .redirect_following_client(&endpoint, detection.scheme, auth.as_ref())
                .ok();
            let mut ctx = ProbeContext {
                client: &detection.client,
                config: &self.config,
                limiter: &self.limiter,
                proxy_url: Some(&proxy_url_full),
                endpoint_host: &endpoint.host,
                endpoint_port: endpoint.port.unwrap_or(detection.scheme.default_port()),
                direct: false,
                oracle: self.oracle.as_ref(),
                result: &mut result,
            };
            probe::run_families(&mut ctx, redirect_client.as_ref()).await;
        }

        // Anonymity and chain detection.
        {
            let caller_ip = self.control_ip().await;
            let echo_url = self.echo_url();
            let mut ctx = ProbeContext {
                client: &detection.client,
                config: &self.config,
                limiter: &self.limiter,
                proxy_url: Some(&proxy_url_full),
                endpoint_host: &endpoint.host,
                endpoint_port: endpoint.port.unwrap_or(detection.scheme.default_port()),
                direct: false,
                oracle: self.oracle.as_ref(),
                result: &mut result,
            };
            probe::anonymity::run(&mut ctx, &echo_url, caller_ip.as_deref()).await;
        }
        let msg = format!("anonymity level {}", result.anonymity);
        self.trace(&mut result, &msg);

        // Fingerprint.
        if self.config.enable_fingerprint {
            let base = format!(
                "http://{}:{}",
                endpoint.host,
                endpoint.port.unwrap_or(detection.scheme.default_port())
            );
            let mut ctx = ProbeContext {
                client: &detection.client,
                config: &self.config,
                limiter: &self.limiter,
                proxy_url: Some(&proxy_url_full),
                endpoint_host: &endpoint.host,
                endpoint_port: endpoint.port.unwrap_or(detection.scheme.default_port()),
                direct: false,
                oracle: self.oracle.as_ref(),
                result: &mut result,
            };
            probe::fingerprint::run(&mut ctx, &base).await;
            if let Some(fp) = &result.fingerprint {
                let msg = format!(
                    "fingerprint {} confidence {:.2}",
                    fp.software, fp.confidence
                );
                self.trace(&mut result, &msg);
            }
        }

        self.logger.info(&format!(
            "finished {proxy_url}: kind={} working={}",
            result.kind, result.working
        ));
        result
    }

    /// The plaintext echo URL used for anonymity probing.
    fn echo_url(&self) -> String {
        let base = &self.config.validation_url;
        let rest = base
            .strip_prefix("http://")
            .or_else(|| base.strip_prefix("https://"))
            .unwrap_or(base);
        format!("http://{rest}")
    }

    /// The caller's own egress IP, from a direct control request.
    async fn control_ip(&self) -> Option<String> {
        let client = self.factory.direct_client().ok()?;
        let response = client.get(self.echo_url()).send().await.ok()?;
        let body = response.text().await.ok()?;
        probe::anonymity::parse_echo_ip(&body)
    }

    /// Validation runner: the configured URL through the chosen client,
    /// under rate limiting and retry, with the response predicates
    /// applied. Returns the elapsed milliseconds of the passing request.
    async fn run_validation(
        &self,
        client: &reqwest::Client,
        proxy_url_full: &str,
        result: &mut ProxyResult,
    ) -> Result<f64, CheckError> {
        let url = self.config.validation_url.clone();
        let deadline = self.config.overall_deadline();
        let limiter = &self.limiter;
        let config = &self.config;
        let target_host = host_of(&url);

        let started = Instant::now();
        let outcome = self
            .retry
            .execute(deadline, || {
                let client = client.clone();
                let url = url.clone();
                let target_host = target_host.clone();
                async move {
                    limiter.acquire(Some(proxy_url_full), &target_host).await;

                    let attempt_started = Instant::now();
                    // Transport transience is classified here, while the
                    // structured error is still in hand; the retry
                    // classifier only sees the stringified form.
                    let response =
                        client
                            .get(&url)
                            .send()
                            .await
                            .map_err(|e| CheckError::RequestFailed {
                                url: url.clone(),
                                reason: probe::flatten_error(&e),
                                transient: RetryPolicy::is_retryable_transport(&e),
                            })?;
                    let status = response.status().as_u16();
                    let headers = response.headers().clone();
                    let body =
                        response
                            .text()
                            .await
                            .map_err(|e| CheckError::RequestFailed {
                                url: url.clone(),
                                reason: e.to_string(),
                                transient: RetryPolicy::is_retryable_transport(&e),
                            })?;

                    validate_response(status, &headers, &body, config).map_err(|reason| {
                        CheckError::ValidationFailed { reason }
                    })?;
                    Ok((status, body.len(), attempt_started.elapsed()))
                }
            })
            .await;

        match outcome {
            Ok((status, body_size, elapsed)) => {
                result.record_check(CheckResult::success(&url, elapsed, status, body_size));
                Ok(elapsed.as_secs_f64() * 1000.0)
            }
            Err(e) => {
                result.record_check(CheckResult::failure(&url, started.elapsed(), e.to_string()));
                Err(e)
            }
        }
    }
}

/// Best-effort PTR lookup for the proxy host.
async fn reverse_lookup(host: &str) -> Option<String> {
    let ip: IpAddr = host.parse().ok()?;
    let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf().ok()?;
    let response = resolver.reverse_lookup(ip).await.ok()?;
    response
        .iter()
        .next()
        .map(|name| name.to_utf8().trim_end_matches('.').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullLogger;
    impl Logger for NullLogger {
        fn info(&self, _message: &str) {}
    }

    #[tokio::test]
    async fn test_invalid_url_terminates_with_populated_result() {
        let engine = Engine::new(EngineConfig::default(), false, Arc::new(NullLogger))
            .await
            .unwrap();
        let result = engine.check("::::").await;

        assert!(!result.working);
        assert!(result.error.as_deref().unwrap_or_default().contains("Invalid proxy URL"));
        assert!(result.checks.is_empty());
    }

    #[tokio::test]
    async fn test_dead_proxy_yields_not_working_with_candidate_probes() {
        let config = EngineConfig {
            timeout: std::time::Duration::from_secs(1),
            validation_url: "http://127.0.0.1:1/".to_string(),
            ..Default::default()
        };
        let engine = Engine::new(config, true, Arc::new(NullLogger)).await.unwrap();
        let result = engine.check("http://127.0.0.1:1").await;

        assert_eq!(result.kind, crate::report::ProxyKind::Unknown);
        assert!(!result.working);
        assert!(result.error.as_deref().unwrap_or_default().contains("not working"));
        // Two echo probes for the explicit-scheme candidate.
        assert!(result.checks.len() >= 2);
        assert!(result.checks.iter().all(|c| !c.success));
    }
}
