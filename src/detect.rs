//! Proxy type detection.
//!
//! Probes candidate schemes in a fixed order against an IP-echo endpoint
//! and picks the best working client. Ordering and preference rules:
//!
//! 1. An explicit URL scheme is probed first and short-circuits.
//! 2. HTTP and HTTPS candidates, both echo probes each; a candidate that
//!    passes both wins immediately, partial successes are collected.
//! 3. Among partials, https support beats http support.
//! 4. Optional HTTP/2 and HTTP/3 (Alt-Svc only) detection.
//! 5. SOCKS5 before SOCKS4; SOCKS5 wins on any success.
//! 6. Otherwise `Unknown` with a composite error naming each candidate's
//!    last failure.

use std::time::Instant;

use crate::client::{ClientFactory, ProxyAuth, ProxyEndpoint, ProxyScheme};
use crate::config::EngineConfig;
use crate::error::CheckError;
use crate::ratelimit::RateLimiter;
use crate::report::{CheckResult, ProxyKind, ProxyResult};

/// Echo endpoint used when no validation URL is configured.
const ECHO_FALLBACK: &str = "http://api.ipify.org?format=json";

/// The chosen transport after detection.
pub struct Detection {
    pub kind: ProxyKind,
    pub scheme: ProxyScheme,
    pub client: reqwest::Client,
    pub supports_http: bool,
    pub supports_https: bool,
}

/// Outcome of probing one candidate scheme.
struct Candidate {
    scheme: ProxyScheme,
    kind: ProxyKind,
    client: Option<reqwest::Client>,
    http_ok: bool,
    https_ok: bool,
    /// An opaque CONNECT tunnel was established even though the request
    /// behind it failed.
    connect_inferred: bool,
    last_error: Option<String>,
}

impl Candidate {
    fn any_success(&self) -> bool {
        self.http_ok || self.https_ok
    }
}

/// The (plaintext, TLS) echo probe pair.
///
/// Derived from the configured validation URL so deployments with a
/// private echo stay self-contained; the public fallback is hardcoded.
fn echo_pair(config: &EngineConfig) -> (String, String) {
    let base = if config.validation_url.is_empty() {
        ECHO_FALLBACK
    } else {
        config.validation_url.as_str()
    };
    let rest = base
        .strip_prefix("http://")
        .or_else(|| base.strip_prefix("https://"))
        .unwrap_or(base);
    (format!("http://{rest}"), format!("https://{rest}"))
}

/// Detect the proxy kind and return the best working client.
pub async fn detect(
    endpoint: &ProxyEndpoint,
    auth: Option<&ProxyAuth>,
    factory: &ClientFactory,
    config: &EngineConfig,
    limiter: &RateLimiter,
    result: &mut ProxyResult,
) -> Result<Detection, CheckError> {
    let (echo_http, echo_https) = echo_pair(config);
    let proxy_hint = factory.proxy_url(endpoint, ProxyScheme::Http, None);

    // Explicit scheme short-circuits the ladder.
    if let Some(scheme) = endpoint.scheme.as_deref().and_then(ProxyScheme::from_name) {
        let kind = match scheme {
            ProxyScheme::Http => ProxyKind::Http,
            ProxyScheme::Https => ProxyKind::Https,
            ProxyScheme::Socks4 => ProxyKind::Socks4,
            ProxyScheme::Socks5 => ProxyKind::Socks5,
        };
        let candidate = try_candidate(
            scheme, kind, endpoint, auth, factory, config, limiter, &proxy_hint, &echo_http,
            &echo_https, result,
        )
        .await;
        return finish_explicit(candidate);
    }

    let mut errors: Vec<String> = Vec::new();
    let mut partial: Option<Candidate> = None;

    // HTTP then HTTPS.
    for (kind, scheme) in [
        (ProxyKind::Http, ProxyScheme::Http),
        (ProxyKind::Https, ProxyScheme::Https),
    ] {
        let candidate = try_candidate(
            scheme, kind, endpoint, auth, factory, config, limiter, &proxy_hint, &echo_http,
            &echo_https, result,
        )
        .await;

        if candidate.http_ok && candidate.https_ok {
            return Ok(into_detection(candidate));
        }
        if candidate.any_success() || candidate.connect_inferred {
            // Prefer-secure: an https-capable partial replaces an
            // http-only one, never the other way around.
            let replace = match &partial {
                Some(existing) => {
                    (candidate.https_ok || candidate.connect_inferred) && !existing.https_ok
                }
                None => true,
            };
            if replace {
                partial = Some(candidate);
                continue;
            }
        }
        if let Some(e) = candidate.last_error {
            errors.push(format!("{}: {e}", candidate.scheme));
        }
    }

    if let Some(candidate) = partial {
        return Ok(into_detection(candidate));
    }

    // HTTP/2: an https probe that actually negotiates h2.
    if config.enable_http2
        && let Ok(client) = factory.h2_client(endpoint, auth)
    {
        limiter.acquire(Some(&proxy_hint), "h2-detect").await;
        let started = Instant::now();
        match client
            .get(&echo_https)
            .timeout(config.timeout)
            .send()
            .await
        {
            Ok(response)
                if response.version() == reqwest::Version::HTTP_2
                    && response.status().as_u16() == 200 =>
            {
                result.record_check(CheckResult::success(
                    &echo_https,
                    started.elapsed(),
                    200,
                    0,
                ));
                return Ok(Detection {
                    kind: ProxyKind::Http2,
                    scheme: ProxyScheme::Https,
                    client,
                    supports_http: false,
                    supports_https: true,
                });
            }
            Ok(response) => {
                result.record_check(CheckResult::failure_with_status(
                    &echo_https,
                    started.elapsed(),
                    response.status().as_u16(),
                    "h2 not negotiated",
                ));
            }
            Err(e) => {
                result.record_check(CheckResult::failure(
                    &echo_https,
                    started.elapsed(),
                    e.to_string(),
                ));
            }
        }
    }

    // HTTP/3 is Alt-Svc sniffing only; no QUIC transport.
    if config.enable_http3
        && let Ok(client) = factory.proxy_client(endpoint, ProxyScheme::Https, auth)
    {
        limiter.acquire(Some(&proxy_hint), "h3-detect").await;
        let started = Instant::now();
        if let Ok(response) = client
            .get(&echo_https)
            .timeout(config.timeout)
            .send()
            .await
        {
            let alt_svc = response
                .headers()
                .get("alt-svc")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            result.record_check(CheckResult::success(
                &echo_https,
                started.elapsed(),
                response.status().as_u16(),
                0,
            ));
            if alt_svc.contains("h3=") || alt_svc.contains("h3-") {
                return Ok(Detection {
                    kind: ProxyKind::Http3,
                    scheme: ProxyScheme::Https,
                    client,
                    supports_http: false,
                    supports_https: true,
                });
            }
        }
    }

    // SOCKS5 preferred over SOCKS4.
    let mut socks_partials: Vec<Candidate> = Vec::new();
    for (kind, scheme) in [
        (ProxyKind::Socks5, ProxyScheme::Socks5),
        (ProxyKind::Socks4, ProxyScheme::Socks4),
    ] {
        let candidate = try_candidate(
            scheme, kind, endpoint, auth, factory, config, limiter, &proxy_hint, &echo_http,
            &echo_https, result,
        )
        .await;

        if candidate.http_ok && candidate.https_ok {
            return Ok(into_detection(candidate));
        }
        if candidate.any_success() {
            if candidate.kind == ProxyKind::Socks5 {
                // SOCKS5 wins on any success at all.
                return Ok(into_detection(candidate));
            }
            socks_partials.push(candidate);
            continue;
        }
        if let Some(e) = candidate.last_error {
            errors.push(format!("{}: {e}", candidate.scheme));
        }
    }

    // socks5+https > socks5+http > socks4+https > any socks.
    socks_partials.sort_by_key(|c| {
        let kind_rank = if c.kind == ProxyKind::Socks5 { 0 } else { 1 };
        let tls_rank = if c.https_ok { 0 } else { 1 };
        (kind_rank, tls_rank)
    });
    if let Some(candidate) = socks_partials.into_iter().next() {
        return Ok(into_detection(candidate));
    }

    let reason = if errors.is_empty() {
        "no candidate scheme produced a response".to_string()
    } else {
        errors.join("; ")
    };
    Err(CheckError::ProxyNotWorking { reason })
}

fn into_detection(candidate: Candidate) -> Detection {
    Detection {
        kind: candidate.kind,
        scheme: candidate.scheme,
        client: candidate.client.expect("successful candidate has a client"),
        supports_http: candidate.http_ok,
        supports_https: candidate.https_ok || candidate.connect_inferred,
    }
}

fn finish_explicit(candidate: Candidate) -> Result<Detection, CheckError> {
    if candidate.any_success() || candidate.connect_inferred {
        return Ok(into_detection(candidate));
    }
    Err(CheckError::ProxyNotWorking {
        reason: candidate
            .last_error
            .unwrap_or_else(|| "no probe succeeded".to_string()),
    })
}

/// Build a client for the scheme and run the two echo probes through it.
#[allow(clippy::too_many_arguments)]
async fn try_candidate(
    scheme: ProxyScheme,
    kind: ProxyKind,
    endpoint: &ProxyEndpoint,
    auth: Option<&ProxyAuth>,
    factory: &ClientFactory,
    config: &EngineConfig,
    limiter: &RateLimiter,
    proxy_hint: &str,
    echo_http: &str,
    echo_https: &str,
    result: &mut ProxyResult,
) -> Candidate {
    let mut candidate = Candidate {
        scheme,
        kind,
        client: None,
        http_ok: false,
        https_ok: false,
        connect_inferred: false,
        last_error: None,
    };

    let client = match factory.proxy_client(endpoint, scheme, auth) {
        Ok(client) => client,
        Err(e) => {
            candidate.last_error = Some(e.to_string());
            return candidate;
        }
    };

    match probe_echo(&client, echo_http, config, limiter, proxy_hint, result).await {
        Ok(()) => candidate.http_ok = true,
        Err(e) => candidate.last_error = Some(e),
    }

    match probe_echo(&client, echo_https, config, limiter, proxy_hint, result).await {
        Ok(()) => candidate.https_ok = true,
        Err(e) => {
            match classify_connect_error(&e) {
                ConnectOutcome::AuthRequired => {
                    candidate.last_error = Some(format!("proxy authentication required: {e}"));
                }
                ConnectOutcome::TunnelEstablished => {
                    // The CONNECT leg worked; only the inner request failed.
                    candidate.connect_inferred = true;
                }
                ConnectOutcome::Other => candidate.last_error = Some(e),
            }
        }
    }

    candidate.client = Some(client);
    candidate
}

enum ConnectOutcome {
    AuthRequired,
    TunnelEstablished,
    Other,
}

/// Classify a CONNECT failure by its error text.
///
/// A plain HTTP proxy asked to tunnel TLS fails with a handful of
/// distinctive shapes: 407s mean credentials, while a "CONNECT ... 200"
/// echo means the tunnel opened and the TLS exchange behind it failed.
fn classify_connect_error(error: &str) -> ConnectOutcome {
    if error.contains("407") || error.contains("Proxy Authentication Required") {
        return ConnectOutcome::AuthRequired;
    }
    if error.contains("CONNECT") && error.contains("200") {
        return ConnectOutcome::TunnelEstablished;
    }
    ConnectOutcome::Other
}

/// One echo probe: GET through the candidate client, success iff a
/// response with status < 400 arrives.
async fn probe_echo(
    client: &reqwest::Client,
    url: &str,
    config: &EngineConfig,
    limiter: &RateLimiter,
    proxy_hint: &str,
    result: &mut ProxyResult,
) -> Result<(), String> {
    limiter
        .acquire(Some(proxy_hint), &crate::probe::host_of(url))
        .await;

    let started = Instant::now();
    match client.get(url).timeout(config.timeout).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let elapsed = started.elapsed();
            if status < 400 {
                result.record_check(CheckResult::success(url, elapsed, status, body.len()));
                Ok(())
            } else {
                result.record_check(CheckResult::failure_with_status(
                    url,
                    elapsed,
                    status,
                    format!("status {status}"),
                ));
                Err(format!("status {status}"))
            }
        }
        Err(e) => {
            let reason = crate::probe::flatten_error(&e);
            result.record_check(CheckResult::failure(url, started.elapsed(), &reason));
            Err(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_pair_swaps_schemes_on_validation_url() {
        let config = EngineConfig {
            validation_url: "https://echo.internal:8443/ip?format=json".to_string(),
            ..Default::default()
        };
        let (http, https) = echo_pair(&config);
        assert_eq!(http, "http://echo.internal:8443/ip?format=json");
        assert_eq!(https, "https://echo.internal:8443/ip?format=json");
    }

    #[test]
    fn test_echo_pair_falls_back_to_public_echo() {
        let config = EngineConfig {
            validation_url: String::new(),
            ..Default::default()
        };
        let (http, https) = echo_pair(&config);
        assert_eq!(http, "http://api.ipify.org?format=json");
        assert_eq!(https, "https://api.ipify.org?format=json");
    }

    #[test]
    fn test_connect_error_classification() {
        assert!(matches!(
            classify_connect_error("proxy returned 407 Proxy Authentication Required"),
            ConnectOutcome::AuthRequired
        ));
        assert!(matches!(
            classify_connect_error("CONNECT 10.0.0.1:443 returned 200 but TLS failed"),
            ConnectOutcome::TunnelEstablished
        ));
        assert!(matches!(
            classify_connect_error("connection refused"),
            ConnectOutcome::Other
        ));
    }
}
