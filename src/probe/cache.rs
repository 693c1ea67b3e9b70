//! Cache poisoning probes.
//!
//! Sends a unique marker in headers that caches commonly leave out of the
//! cache key, then re-fetches the same URL cleanly. If the marker comes
//! back on the clean request, the first response was stored keyed only on
//! the URL and the header is an unkeyed input — a poisonable cache.

use uuid::Uuid;

use crate::probe::ProbeContext;
use crate::report::{CachePoisoningReport, Finding, Severity};

/// Headers that routinely escape cache keys.
const UNKEYED_HEADERS: &[&str] = &[
    "X-Forwarded-Host",
    "X-Original-URL",
    "X-Host",
    "X-Forwarded-Scheme",
    "X-Rewrite-URL",
];

pub async fn run(ctx: &mut ProbeContext<'_>) {
    let mut report = CachePoisoningReport::default();
    let base = ctx.self_base();

    for header in UNKEYED_HEADERS {
        if poison_round(ctx, &base, header, None).await {
            report.vulnerable = true;
            report.poisoned_header = Some((*header).to_string());
            report.findings.push(Finding::new(
                "cache-poisoning",
                &base,
                format!("marker sent in unkeyed header {header} reflected on a clean request"),
                Severity::High,
            ));
        }
    }

    // Cloudflare-specific: CF-Connecting-IP is trusted upstream and is an
    // IP-shaped value, so the marker is an address here.
    if poison_round(ctx, &base, "CF-Connecting-IP", Some("198.51.100.77")).await {
        report.vulnerable = true;
        report.poisoned_header = Some("CF-Connecting-IP".to_string());
        report.findings.push(Finding::new(
            "cache-poisoning-cf-connecting-ip",
            &base,
            "CF-Connecting-IP value reflected on a clean request",
            Severity::High,
        ));
    }

    ctx.result.cache_poisoning = Some(report);
}

/// One poison-then-verify round. The cache-busting query pins both
/// requests to a fresh cache entry; only the first carries the marker.
async fn poison_round(
    ctx: &mut ProbeContext<'_>,
    base: &str,
    header: &str,
    fixed_marker: Option<&str>,
) -> bool {
    let bust = Uuid::new_v4().simple().to_string();
    let generated;
    let marker = match fixed_marker {
        Some(m) => m,
        None => {
            generated = format!("poison-{}.invalid", Uuid::new_v4().simple());
            &generated
        }
    };
    let url = format!("{base}/?cb={bust}");

    if ctx.get_with_headers(&url, &[(header, marker)]).await.is_err() {
        return false;
    }

    match ctx.get(&url).await {
        Ok(clean) => clean.body.contains(marker),
        Err(_) => false,
    }
}
