//! Protocol smuggling probes.
//!
//! Sends a POST carrying both `Content-Length` and `Transfer-Encoding:
//! chunked` — a shape a compliant front-end must reject or normalize. A
//! status below 400 means the endpoint accepted the ambiguous framing.
//! Vendor modules reuse the same probe and count it under their own
//! reports.

use crate::client::raw;
use crate::probe::{LONG_PROBE_TIMEOUT, ProbeContext};
use crate::report::{Finding, Severity, SmugglingReport};

/// The ambiguous CL+TE body: a terminating chunk followed by a stray byte
/// that only a Content-Length parser will consume.
const CL_TE_BODY: &[u8] = b"0\r\n\r\nG";

/// Issue one CL+TE probe and return a finding if it was accepted.
pub(crate) async fn cl_te_probe(ctx: &mut ProbeContext<'_>, check: &str) -> Option<Finding> {
    let authority = format!("{}:{}", ctx.endpoint_host, ctx.endpoint_port);
    let request = raw::build_request(
        "POST",
        "/",
        "HTTP/1.1",
        &[
            ("Host", &authority),
            ("Content-Length", &CL_TE_BODY.len().to_string()),
            ("Transfer-Encoding", "chunked"),
            ("Connection", "close"),
        ],
        CL_TE_BODY,
    );

    let label = format!("smuggling:{check}");
    let response = ctx.send_raw(&label, &request, LONG_PROBE_TIMEOUT).await.ok()?;
    let status = response.status?;
    if status < 400 {
        Some(Finding::new(
            check,
            format!("http://{authority}/"),
            format!("CL+TE request accepted with status {status}"),
            Severity::High,
        ))
    } else {
        None
    }
}

/// TE-CL counterpart: chunked framing that hides a second request from a
/// Content-Length parser.
async fn te_cl_probe(ctx: &mut ProbeContext<'_>) -> Option<Finding> {
    let authority = format!("{}:{}", ctx.endpoint_host, ctx.endpoint_port);
    let body = b"5\r\nhello\r\n0\r\n\r\n";
    let request = raw::build_request(
        "POST",
        "/",
        "HTTP/1.1",
        &[
            ("Host", &authority),
            ("Content-Length", "4"),
            ("Transfer-Encoding", "chunked"),
            ("Connection", "close"),
        ],
        body,
    );

    let response = ctx
        .send_raw("smuggling:te-cl", &request, LONG_PROBE_TIMEOUT)
        .await
        .ok()?;
    let status = response.status?;
    if status < 400 {
        Some(Finding::new(
            "te-cl-accepted",
            format!("http://{authority}/"),
            format!("TE-CL request accepted with status {status}"),
            Severity::High,
        ))
    } else {
        None
    }
}

/// Run the smuggling family.
pub async fn run(ctx: &mut ProbeContext<'_>) {
    let mut report = SmugglingReport::default();

    if let Some(finding) = cl_te_probe(ctx, "cl-te-accepted").await {
        report.cl_te_accepted = true;
        report.findings.push(finding);
    }
    if let Some(finding) = te_cl_probe(ctx).await {
        report.findings.push(finding);
    }

    ctx.result.smuggling = Some(report);
}
