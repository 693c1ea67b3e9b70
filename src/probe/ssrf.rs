//! Basic SSRF probes.
//!
//! Asks the proxy to fetch a curated catalogue of internal targets —
//! loopback spellings, cloud metadata endpoints, RFC1918 representatives,
//! IPv6 forms and numeric re-encodings of 127.0.0.1. A response with a
//! status outside {403, 502, 503} means the proxy reached into address
//! space it should refuse to touch.

use crate::probe::{LONG_PROBE_TIMEOUT, MetadataSignatures, ProbeContext};
use crate::report::{Finding, Severity, SsrfReport};

/// Internal-target spellings for the basic sweep.
pub const SSRF_TARGETS: &[&str] = &[
    "127.0.0.1",
    "localhost",
    "0.0.0.0",
    "127.1",
    "[::1]",
    "[::ffff:127.0.0.1]",
    "169.254.169.254",
    "metadata.google.internal",
    "100.100.100.200",
    "10.0.0.1",
    "172.16.0.1",
    "192.168.1.1",
    "2130706433",
    "017700000001",
    "0x7f000001",
];

/// Statuses that mean the proxy (or its upstream) refused the fetch.
fn refused(status: u16) -> bool {
    matches!(status, 403 | 502 | 503)
}

pub async fn run(ctx: &mut ProbeContext<'_>) {
    let mut report = SsrfReport::default();
    let signatures = MetadataSignatures::new();

    for target in SSRF_TARGETS {
        let url = ctx.target_url(&format!("http://{target}/"));
        let Ok(response) = ctx
            .send(reqwest::Method::GET, &url, &[], None, LONG_PROBE_TIMEOUT)
            .await
        else {
            continue;
        };

        if ctx.direct {
            // The endpoint's fetcher did the dialing; only internal
            // content in its answer proves it reached the target.
            let Some(signature) = signatures.first_match(&response.body) else {
                continue;
            };
            report.vulnerable = true;
            report.accessible_targets.push((*target).to_string());
            report.findings.push(Finding::new(
                "ssrf-internal-target",
                &url,
                format!(
                    "endpoint fetched the internal target and returned '{signature}' (status {})",
                    response.status
                ),
                Severity::Critical,
            ));
            continue;
        }

        if refused(response.status) {
            continue;
        }

        report.vulnerable = true;
        report.accessible_targets.push((*target).to_string());

        let severity = if signatures.is_internal_content(&response.body) {
            Severity::Critical
        } else {
            Severity::High
        };
        let evidence = match signatures.first_match(&response.body) {
            Some(signature) => format!(
                "internal target answered through the proxy with status {} and signature '{signature}'",
                response.status
            ),
            None => format!(
                "internal target answered through the proxy with status {}",
                response.status
            ),
        };
        report
            .findings
            .push(Finding::new("ssrf-internal-target", &url, evidence, severity));
    }

    ctx.result.ssrf = Some(report);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_table_covers_required_families() {
        // Loopback spellings, metadata endpoints, RFC1918, IPv6, numeric
        // re-encodings.
        assert!(SSRF_TARGETS.contains(&"localhost"));
        assert!(SSRF_TARGETS.contains(&"169.254.169.254"));
        assert!(SSRF_TARGETS.contains(&"10.0.0.1"));
        assert!(SSRF_TARGETS.contains(&"[::1]"));
        assert!(SSRF_TARGETS.contains(&"2130706433"));
        assert!(SSRF_TARGETS.iter().any(|t| t.starts_with("0x")));
    }

    #[test]
    fn test_refusal_statuses() {
        assert!(refused(403));
        assert!(refused(502));
        assert!(refused(503));
        assert!(!refused(200));
        assert!(!refused(404));
        assert!(!refused(500));
    }
}
