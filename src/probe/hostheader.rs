//! Host header injection probes.
//!
//! Walks a matrix of internal targets across every header a front-end
//! might trust for routing or client identity, then adds the malformed
//! shapes a lenient parser lets through: conflicting duplicate Host
//! lines, the HTTP/1.0 no-Host downgrade, and Host values carrying CR,
//! LF, NUL, tab or trailing-space bytes. Any status outside
//! {400, 403, 502} means the endpoint entertained the override.

use crate::client::raw;
use crate::probe::{HOST_OVERRIDE_HEADERS, INTERNAL_TARGETS, PROBE_TIMEOUT, ProbeContext};
use crate::report::{Finding, HostHeaderReport, Severity};

/// Statuses that mean the endpoint rejected the override.
fn rejected(status: u16) -> bool {
    matches!(status, 400 | 403 | 502)
}

pub async fn run(ctx: &mut ProbeContext<'_>) {
    let mut report = HostHeaderReport::default();
    let base = ctx.self_base();

    // Target x header matrix.
    for target in INTERNAL_TARGETS {
        for header in HOST_OVERRIDE_HEADERS {
            let Ok(response) = ctx
                .get_with_headers(&base, &[(*header, *target)])
                .await
            else {
                continue;
            };

            if !rejected(response.status) {
                report.vulnerable = true;
                if !report.accepted_targets.contains(&(*target).to_string()) {
                    report.accepted_targets.push((*target).to_string());
                }
                report.findings.push(Finding::new(
                    "host-header-injection",
                    &base,
                    format!("{header}: {target} accepted with status {}", response.status),
                    Severity::Medium,
                ));
            }
        }
    }

    raw_variants(ctx, &mut report).await;

    ctx.result.host_header_injection = Some(report);
}

/// Shapes that require hand-written request lines.
async fn raw_variants(ctx: &mut ProbeContext<'_>, report: &mut HostHeaderReport) {
    let authority = format!("{}:{}", ctx.endpoint_host, ctx.endpoint_port);

    // Conflicting duplicate Host headers.
    let duplicate = raw::build_request(
        "GET",
        "/",
        "HTTP/1.1",
        &[
            ("Host", authority.as_str()),
            ("Host", "127.0.0.1"),
            ("Connection", "close"),
        ],
        b"",
    );
    if let Ok(response) = ctx
        .send_raw("host-header:duplicate", &duplicate, PROBE_TIMEOUT)
        .await
        && response.status.is_some_and(|s| !rejected(s))
    {
        report.vulnerable = true;
        report.findings.push(Finding::new(
            "host-header-duplicate",
            format!("http://{authority}/"),
            format!(
                "conflicting duplicate Host headers accepted with status {}",
                response.status.unwrap_or_default()
            ),
            Severity::Medium,
        ));
    }

    // HTTP/1.0 requires no Host at all; front-ends that fall back to a
    // default vhost here often skip Host-based ACLs.
    let downgrade = raw::build_request("GET", "/", "HTTP/1.0", &[("Connection", "close")], b"");
    if let Ok(response) = ctx
        .send_raw("host-header:http10-bypass", &downgrade, PROBE_TIMEOUT)
        .await
        && response.status.is_some_and(|s| s < 400)
    {
        report.findings.push(Finding::new(
            "host-header-http10-bypass",
            format!("http://{authority}/"),
            format!(
                "HTTP/1.0 request without Host answered with status {}",
                response.status.unwrap_or_default()
            ),
            Severity::Low,
        ));
    }

    // Malformed Host values a strict parser must refuse.
    let malformed: [(&str, String); 5] = [
        ("cr", format!("{authority}\r")),
        ("lf", format!("{authority}\nX-Injected: 1")),
        ("nul", format!("{authority}\0")),
        ("tab", format!("{authority}\tevil.example")),
        ("trailing-space", format!("{authority} ")),
    ];
    for (shape, value) in malformed {
        let request = raw::build_request(
            "GET",
            "/",
            "HTTP/1.1",
            &[("Host", value.as_str()), ("Connection", "close")],
            b"",
        );
        if let Ok(response) = ctx
            .send_raw(&format!("host-header:malformed-{shape}"), &request, PROBE_TIMEOUT)
            .await
            && response.status.is_some_and(|s| !rejected(s))
        {
            report.vulnerable = true;
            report.findings.push(Finding::new(
                format!("host-header-malformed-{shape}"),
                format!("http://{authority}/"),
                format!(
                    "Host value with {shape} byte accepted with status {}",
                    response.status.unwrap_or_default()
                ),
                Severity::Medium,
            ));
        }
    }
}
