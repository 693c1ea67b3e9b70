//! Direct-scan fallback.
//!
//! When type detection fails but probe families are enabled, the endpoint
//! is treated as a web server instead of a proxy: a direct client replaces
//! the proxy client and the catalogue runs with each family's "through a
//! proxy?" interpretation replaced by "is this endpoint itself
//! exploitable?". The result keeps `kind = Unknown` and `working = false`.

use std::sync::OnceLock;

use regex::Regex;

use crate::client::{ClientFactory, ProxyEndpoint};
use crate::config::EngineConfig;
use crate::oracle::OracleHandle;
use crate::probe::{self, MetadataSignatures, ProbeContext};
use crate::ratelimit::RateLimiter;
use crate::report::{Finding, ProxyResult, Severity, SsrfReport};

/// Internal targets tried through `?url=` reflection parameters.
const PARAM_TARGETS: &[&str] = &[
    "http://169.254.169.254/latest/meta-data/",
    "http://127.0.0.1/",
    "http://metadata.google.internal/computeMetadata/v1/",
];

fn rfc1918_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(10\.\d{1,3}\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3}|172\.(1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3})\b")
            .expect("static rfc1918 regex")
    })
}

/// The port a non-proxy endpoint most likely serves HTTP on.
fn target_port(endpoint: &ProxyEndpoint) -> u16 {
    if let Some(port) = endpoint.port {
        return port;
    }
    match endpoint.scheme.as_deref() {
        Some("https") | Some("socks5") => 443,
        _ => 80,
    }
}

/// Scan the endpoint directly. Always leaves `working = false`.
pub async fn run(
    endpoint: &ProxyEndpoint,
    factory: &ClientFactory,
    config: &EngineConfig,
    limiter: &RateLimiter,
    oracle: Option<&OracleHandle>,
    result: &mut ProxyResult,
) {
    let client = match factory.direct_client() {
        Ok(client) => client,
        Err(e) => {
            result.trace(&format!("direct scan aborted: {e}"));
            return;
        }
    };

    let port = target_port(endpoint);
    let base = format!("http://{}:{}", endpoint.host, port);
    let checks_before = result.checks.len();

    let mut ctx = ProbeContext {
        client: &client,
        config,
        limiter,
        proxy_url: None,
        endpoint_host: &endpoint.host,
        endpoint_port: port,
        direct: true,
        oracle,
        result,
    };

    baseline(&mut ctx, &base).await;
    // Identify the server software; a non-proxy endpoint usually names
    // itself readily.
    probe::fingerprint::run(&mut ctx, &base).await;
    ssrf_parameters(&mut ctx, &base).await;

    let redirect_client = factory.redirect_following_direct_client().ok();
    probe::run_families(&mut ctx, redirect_client.as_ref()).await;

    let requests = result.checks.len() - checks_before;
    result.trace("==== DIRECT SCAN SUMMARY ====");
    result.trace(&format!("target: {base}"));
    result.trace(&format!(
        "categories: baseline, fingerprint, ssrf-parameters{}",
        if config.advanced.any_enabled() {
            ", vulnerability-catalogue"
        } else {
            ""
        }
    ));
    result.trace(&format!("requests issued: {requests}"));
    result.trace("=============================");
}

/// Baseline request: server identity headers and internal-address leakage
/// in the body.
async fn baseline(ctx: &mut ProbeContext<'_>, base: &str) {
    let Ok(response) = ctx.get(base).await else {
        return;
    };

    for header in ["server", "via", "x-powered-by", "x-forwarded-for"] {
        if let Some(value) = response.header(header) {
            let line = format!("baseline header {header}: {value}");
            ctx.result.trace(&line);
        }
    }

    if let Some(leak) = rfc1918_regex().find(&response.body) {
        ctx.result.push_warning(format!(
            "endpoint body leaks internal address {}",
            leak.as_str()
        ));
    }
}

/// `?url=` reflection tests against common fetcher parameters.
async fn ssrf_parameters(ctx: &mut ProbeContext<'_>, base: &str) {
    let signatures = MetadataSignatures::new();
    let mut report = ctx.result.ssrf.take().unwrap_or_else(SsrfReport::default);

    for target in PARAM_TARGETS {
        let url = format!("{base}/?url={}", urlencoding::encode(target));
        let Ok(response) = ctx.get(&url).await else {
            continue;
        };
        if let Some(signature) = signatures.first_match(&response.body) {
            report.vulnerable = true;
            report.accessible_targets.push((*target).to_string());
            report.findings.push(Finding::new(
                "ssrf-url-parameter",
                &url,
                format!("fetcher parameter returned '{signature}' (status {})", response.status),
                Severity::Critical,
            ));
        }
    }

    ctx.result.ssrf = Some(report);
}
