//! DNS rebinding probes.
//!
//! Uses a public rebinding service whose records alternate between a
//! public and an internal address. Two sequential requests with a short
//! gap: if the second lands on the internal resolution, the connection
//! either succeeds against an internal service or is refused by one —
//! both are evidence the proxy resolves per-request and will follow a
//! rebound name inside its network.

use std::time::Duration;

use crate::probe::{MetadataSignatures, ProbeContext};
use crate::report::{Finding, RebindingReport, Severity};

/// Rebinding hosts alternating 8.8.8.8 with an internal address.
const REBIND_HOSTS: &[&str] = &[
    "08080808.7f000001.rbndr.us",
    "08080808.0a000001.rbndr.us",
];

/// Gap between the two requests so the TTL-0 record can flip.
const REBIND_GAP: Duration = Duration::from_millis(1500);

pub async fn run(ctx: &mut ProbeContext<'_>) {
    let mut report = RebindingReport::default();
    let signatures = MetadataSignatures::new();

    // Exactly one variant runs per call: the oracle-wrapped probe when an
    // interaction server is live, the public rebinding services otherwise.
    if let Some(oracle) = ctx.oracle {
        let client = ctx.client.clone();
        let observed = oracle
            .observe(move |url| async move {
                let _ = client
                    .get(&url)
                    .timeout(crate::probe::PROBE_TIMEOUT)
                    .send()
                    .await;
            })
            .await;
        if observed {
            report.findings.push(Finding::new(
                "oob-resolution-confirmed",
                oracle.server(),
                "endpoint resolved and fetched an attacker-controlled domain",
                Severity::Info,
            ));
        }
        ctx.result.dns_rebinding = Some(report);
        return;
    }

    for host in REBIND_HOSTS {
        // Direct scans hand the rebinding name to the endpoint's fetcher;
        // dialing it ourselves would exercise the scanner's resolver.
        let url = ctx.target_url(&format!("http://{host}/"));

        // First request primes the resolver; its outcome is irrelevant.
        let _ = ctx.get(&url).await;
        tokio::time::sleep(REBIND_GAP).await;

        match ctx.get(&url).await {
            Ok(response) => {
                if signatures.is_internal_content(&response.body) {
                    report.vulnerable = true;
                    report.findings.push(Finding::new(
                        "dns-rebinding",
                        &url,
                        format!(
                            "rebound request returned internal-service content (status {})",
                            response.status
                        ),
                        Severity::High,
                    ));
                }
            }
            Err(e) => {
                let message = e.to_string();
                // A refusal means the proxy reached the rebound internal
                // address and something answered the SYN. Only meaningful
                // when the proxy did the dialing.
                if !ctx.direct && message.contains("connection refused") {
                    report.vulnerable = true;
                    report.findings.push(Finding::new(
                        "dns-rebinding-refused",
                        &url,
                        "rebound request was refused by an internal address",
                        Severity::Medium,
                    ));
                }
            }
        }
    }

    ctx.result.dns_rebinding = Some(report);
}
