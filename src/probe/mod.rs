//! Probe plumbing shared by every vulnerability family.
//!
//! A `ProbeContext` bundles the chosen client, the configuration, the rate
//! limiter and the assembling result. Families are plain async functions
//! over the context, enumerated statically by the orchestrator in a fixed
//! order; a disabled family is never called and emits no traffic.
//!
//! Probe discipline, enforced here: every request takes a rate-limit
//! lease, carries a short per-probe timeout (narrower than the engine
//! timeout), reads a capped body, and never follows redirects.

pub mod anonymity;
pub mod cache;
pub mod fingerprint;
pub mod hostheader;
pub mod ipv6;
pub mod methods;
pub mod rebinding;
pub mod smuggling;
pub mod ssrf;
pub mod ssrf_advanced;
pub mod vendor;

use std::time::{Duration, Instant};

use aho_corasick::AhoCorasick;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::client::raw::{self, RawResponse};
use crate::config::EngineConfig;
use crate::error::CheckError;
use crate::oracle::OracleHandle;
use crate::ratelimit::RateLimiter;
use crate::report::{CheckResult, ProxyResult};

/// Default per-probe timeout; narrower than the engine timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout for probes against targets expected to be slow or absent.
pub const LONG_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Cap on probe response bodies.
const MAX_PROBE_BODY: usize = 256 * 1024;

/// A probe response, body already read and capped.
#[derive(Debug)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed: Duration,
}

impl ProbeResponse {
    /// First value of a header as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Everything a probe family needs for one check call.
pub struct ProbeContext<'a> {
    pub client: &'a reqwest::Client,
    pub config: &'a EngineConfig,
    pub limiter: &'a RateLimiter,
    /// Full proxy URL when probing through a proxy; `None` in direct scan.
    pub proxy_url: Option<&'a str>,
    /// The endpoint host itself, for raw-socket probes and self-targeting.
    pub endpoint_host: &'a str,
    pub endpoint_port: u16,
    /// True when the endpoint is being scanned directly as a web server.
    pub direct: bool,
    pub oracle: Option<&'a OracleHandle>,
    pub result: &'a mut ProxyResult,
}

impl<'a> ProbeContext<'a> {
    /// Base URL of the endpoint itself, for probes that target the proxy's
    /// own HTTP surface.
    pub fn self_base(&self) -> String {
        format!("http://{}:{}", self.endpoint_host, self.endpoint_port)
    }

    /// A URL that reaches `target` through the subject under test.
    ///
    /// Through a proxy client the target is named directly and the proxy
    /// does the fetching. In a direct scan the client has no proxy, so the
    /// target is handed to the endpoint's own fetcher via the `?url=`
    /// parameter pattern — requesting the internal address ourselves would
    /// test the scanning host, not the endpoint.
    pub fn target_url(&self, target: &str) -> String {
        if self.direct {
            format!("{}/?url={}", self.self_base(), urlencoding::encode(target))
        } else {
            target.to_string()
        }
    }

    /// Issue a request and record its outcome as a `CheckResult`.
    ///
    /// A response of any status counts as probe success at this layer;
    /// families apply their own classifiers on top.
    pub async fn send(
        &mut self,
        method: reqwest::Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<ProbeResponse, CheckError> {
        let host = host_of(url);
        self.limiter.acquire(self.proxy_url, &host).await;

        let started = Instant::now();
        let mut request = self.client.request(method, url).timeout(timeout);
        for (name, value) in headers {
            // Values reqwest cannot represent belong in the raw path.
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                request = request.header(name, value);
            }
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response.headers().clone();
                let body = read_capped(response).await;
                let elapsed = started.elapsed();
                self.result
                    .record_check(CheckResult::success(url, elapsed, status, body.len()));
                Ok(ProbeResponse {
                    status,
                    headers,
                    body,
                    elapsed,
                })
            }
            Err(e) => {
                let elapsed = started.elapsed();
                let reason = flatten_error(&e);
                self.result
                    .record_check(CheckResult::failure(url, elapsed, &reason));
                Err(CheckError::RequestFailed {
                    url: url.to_string(),
                    reason,
                    transient: crate::retry::RetryPolicy::is_retryable_transport(&e),
                })
            }
        }
    }

    /// Convenience GET with the default probe timeout.
    pub async fn get(&mut self, url: &str) -> Result<ProbeResponse, CheckError> {
        self.send(reqwest::Method::GET, url, &[], None, PROBE_TIMEOUT).await
    }

    /// GET with extra headers.
    pub async fn get_with_headers(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<ProbeResponse, CheckError> {
        self.send(reqwest::Method::GET, url, headers, None, PROBE_TIMEOUT)
            .await
    }

    /// Send a hand-assembled request to the endpoint itself over TCP and
    /// record the outcome.
    pub async fn send_raw(
        &mut self,
        label: &str,
        request: &[u8],
        timeout: Duration,
    ) -> Result<RawResponse, CheckError> {
        self.limiter.acquire(self.proxy_url, self.endpoint_host).await;

        let started = Instant::now();
        let outcome = raw::send(self.endpoint_host, self.endpoint_port, request, timeout).await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(response) => {
                self.result.record_check(CheckResult {
                    url: label.to_string(),
                    success: true,
                    elapsed_ms: elapsed.as_secs_f64() * 1000.0,
                    error: None,
                    status: response.status,
                    body_size: Some(response.body.len()),
                });
            }
            Err(e) => {
                self.result
                    .record_check(CheckResult::failure(label, elapsed, e.to_string()));
            }
        }
        outcome
    }
}

/// Run every enabled probe family in declaration order.
///
/// Shared between the advanced phase (through the proxy client) and the
/// direct-scan fallback (direct client, `direct = true`); the ordering is
/// observable through `checks` and must stay fixed.
pub(crate) async fn run_families(
    ctx: &mut ProbeContext<'_>,
    redirect_client: Option<&reqwest::Client>,
) {
    let advanced = ctx.config.advanced.clone();

    if advanced.test_protocol_smuggling {
        smuggling::run(ctx).await;
    }
    if advanced.test_dns_rebinding {
        rebinding::run(ctx).await;
    }
    if advanced.test_ipv6 {
        ipv6::run(ctx).await;
    }
    if !advanced.test_http_methods.is_empty() {
        methods::run(ctx).await;
    }
    if advanced.test_cache_poisoning {
        cache::run(ctx).await;
    }
    if advanced.test_host_header_injection {
        hostheader::run(ctx).await;
    }
    if advanced.test_ssrf {
        ssrf::run(ctx).await;
        ssrf_advanced::run(ctx, redirect_client).await;
    }
    if advanced.test_nginx_vulnerabilities {
        vendor::nginx::run(ctx).await;
    }
    if advanced.test_apache_vulnerabilities {
        vendor::apache::run(ctx).await;
    }
    if advanced.test_vendor_vulnerabilities {
        vendor::haproxy::run(ctx).await;
        vendor::squid::run(ctx).await;
        vendor::traefik::run(ctx).await;
        vendor::envoy::run(ctx).await;
        vendor::caddy::run(ctx).await;
        vendor::varnish::run(ctx).await;
    }
    if advanced.test_kong_vulnerabilities {
        vendor::kong::run(ctx).await;
    }
    if advanced.test_generic_vulnerabilities {
        vendor::generic::run(ctx).await;
    }
    if ctx.config.enable_cloud_checks {
        vendor::cloud::run(ctx).await;
    }
    if advanced.test_extended_vulnerabilities {
        vendor::extended::run(ctx).await;
    }
}

/// Read a response body up to the probe cap.
async fn read_capped(response: reqwest::Response) -> String {
    use futures::StreamExt;

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        if body.len() + chunk.len() > MAX_PROBE_BODY {
            body.extend_from_slice(&chunk[..MAX_PROBE_BODY - body.len()]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Flatten a reqwest error chain into one line; the classifier and the
/// report both want substring-matchable text.
pub fn flatten_error(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

/// Hostname of a URL, for rate-limit keying.
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

/// Internal targets exercised by the host-header and SSRF families.
pub const INTERNAL_TARGETS: &[&str] = &[
    "127.0.0.1",
    "127.0.0.1:22",
    "127.0.0.1:3306",
    "127.0.0.1:6379",
    "192.168.1.1",
    "10.0.0.1",
    "172.16.0.1",
    "169.254.169.254",
    "localhost",
    "0.0.0.0",
    "[::1]",
    "metadata.google.internal",
];

/// Header names that commonly override routing or client identity.
pub const HOST_OVERRIDE_HEADERS: &[&str] = &[
    "Host",
    "X-Forwarded-Host",
    "X-Host",
    "X-Forwarded-Server",
    "X-HTTP-Host-Override",
    "X-Real-IP",
    "X-Originating-IP",
    "X-Remote-IP",
    "X-Client-IP",
    "CF-Connecting-IP",
    "True-Client-IP",
];

/// Response substrings that identify internal or metadata services.
const METADATA_SIGNATURES: &[&str] = &[
    "ami-id",
    "instance-id",
    "instance-type",
    "iam/security-credentials",
    "computeMetadata",
    "metadata.google.internal",
    "latest/meta-data",
    "redis_version",
    "root:x:0:0",
    "mysql_native_password",
    "SSH-2.0",
    "couchdb",
    "\"cluster_name\"",
    "access_token",
    "SecretAccessKey",
];

/// Multi-pattern matcher over metadata-service signatures.
///
/// Built once and shared; the same architecture as the leak scanner the
/// engine's lineage uses for secret egress.
pub struct MetadataSignatures {
    matcher: AhoCorasick,
}

impl MetadataSignatures {
    pub fn new() -> Self {
        Self {
            matcher: AhoCorasick::new(METADATA_SIGNATURES)
                .expect("static signature table must compile"),
        }
    }

    /// The first signature present in the body, if any.
    pub fn first_match(&self, body: &str) -> Option<&'static str> {
        self.matcher
            .find(body)
            .map(|m| METADATA_SIGNATURES[m.pattern().as_usize()])
    }

    pub fn is_internal_content(&self, body: &str) -> bool {
        self.first_match(body).is_some()
    }
}

impl Default for MetadataSignatures {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_signatures_match_cloud_payloads() {
        let sigs = MetadataSignatures::new();
        assert_eq!(
            sigs.first_match("ami-id\ninstance-id\nhostname"),
            Some("ami-id")
        );
        assert!(sigs.is_internal_content("root:x:0:0:root:/root:/bin/bash"));
        assert!(sigs.is_internal_content("redis_version:6.2.5"));
        assert!(!sigs.is_internal_content("<html>welcome</html>"));
    }

    #[test]
    fn test_host_of_handles_urls_and_garbage() {
        assert_eq!(host_of("http://example.com:8080/path"), "example.com");
        assert_eq!(host_of("not a url"), "not a url");
    }

    #[test]
    fn test_internal_target_table_covers_metadata_endpoints() {
        assert!(INTERNAL_TARGETS.contains(&"169.254.169.254"));
        assert!(INTERNAL_TARGETS.contains(&"metadata.google.internal"));
        assert_eq!(HOST_OVERRIDE_HEADERS.len(), 11);
    }

    #[test]
    fn test_target_url_reroutes_internal_targets_in_direct_mode() {
        let config = EngineConfig::default();
        let limiter = RateLimiter::new(crate::ratelimit::RateLimitConfig::disabled());
        let client = reqwest::Client::new();
        let mut result = ProxyResult::new("http://203.0.113.10:8080");

        let mut ctx = ProbeContext {
            client: &client,
            config: &config,
            limiter: &limiter,
            proxy_url: None,
            endpoint_host: "203.0.113.10",
            endpoint_port: 8080,
            direct: false,
            oracle: None,
            result: &mut result,
        };

        // Proxied: the proxy fetches the internal target itself.
        assert_eq!(
            ctx.target_url("http://169.254.169.254/"),
            "http://169.254.169.254/"
        );

        // Direct: the endpoint's own fetcher gets the target; the scanner
        // never dials the internal address.
        ctx.direct = true;
        assert_eq!(
            ctx.target_url("http://169.254.169.254/"),
            "http://203.0.113.10:8080/?url=http%3A%2F%2F169.254.169.254%2F"
        );
    }
}
