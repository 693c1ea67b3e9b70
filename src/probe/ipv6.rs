//! IPv6 connectivity probe.
//!
//! Asks the subject to fetch an IPv6 literal. Through a proxy, any
//! response or a refusal from the loopback means the proxy attempted (and
//! can attempt) IPv6 connections on the client's behalf; in a direct scan
//! the literal rides the `?url=` pattern and only fetched internal
//! content counts.

use crate::probe::ProbeContext;
use crate::report::{Finding, Ipv6Report, Severity};

const IPV6_TARGET: &str = "http://[::1]/";

pub async fn run(ctx: &mut ProbeContext<'_>) {
    let mut report = Ipv6Report::default();

    // Direct scans route through the endpoint's fetcher; dialing the
    // loopback ourselves would test the scanning host's IPv6 stack.
    let url = ctx.target_url(IPV6_TARGET);

    match ctx.get(&url).await {
        Ok(response) => {
            if ctx.direct {
                let signatures = crate::probe::MetadataSignatures::new();
                if signatures.is_internal_content(&response.body) {
                    report.attempted = true;
                    report.findings.push(Finding::new(
                        "ipv6-loopback-reachable",
                        &url,
                        format!(
                            "endpoint fetcher reached the IPv6 loopback (status {})",
                            response.status
                        ),
                        Severity::Medium,
                    ));
                }
            } else {
                report.attempted = true;
                report.findings.push(Finding::new(
                    "ipv6-loopback-reachable",
                    &url,
                    format!("proxy fetched the IPv6 loopback (status {})", response.status),
                    Severity::Medium,
                ));
            }
        }
        Err(e) => {
            let message = e.to_string();
            if !ctx.direct && (message.contains("connection refused") || message.contains("reset"))
            {
                // The dial happened; nothing was listening.
                report.attempted = true;
                report.findings.push(Finding::new(
                    "ipv6-dial-attempted",
                    &url,
                    "proxy attempted an IPv6 connection",
                    Severity::Info,
                ));
            }
        }
    }

    ctx.result.ipv6 = Some(report);
}
