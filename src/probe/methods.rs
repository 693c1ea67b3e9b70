//! HTTP method survey.
//!
//! Requests the validation URL once per configured method and records the
//! status each one earns. Useful both as a capability map and to spot
//! proxies that let write methods through to arbitrary origins.

use crate::probe::{PROBE_TIMEOUT, ProbeContext};
use crate::report::{MethodStatus, MethodsReport};

pub async fn run(ctx: &mut ProbeContext<'_>) {
    let methods = ctx.config.advanced.test_http_methods.clone();
    // In a direct scan the endpoint itself is the subject; the validation
    // URL belongs to the proxy path.
    let url = if ctx.direct {
        ctx.self_base()
    } else {
        ctx.config.validation_url.clone()
    };
    let mut report = MethodsReport::default();

    for name in methods {
        let Ok(method) = reqwest::Method::from_bytes(name.to_ascii_uppercase().as_bytes()) else {
            report.results.push(MethodStatus {
                method: name,
                status: None,
                error: Some("invalid method name".to_string()),
            });
            continue;
        };

        match ctx.send(method, &url, &[], None, PROBE_TIMEOUT).await {
            Ok(response) => report.results.push(MethodStatus {
                method: name,
                status: Some(response.status),
                error: None,
            }),
            Err(e) => report.results.push(MethodStatus {
                method: name,
                status: None,
                error: Some(e.to_string()),
            }),
        }
    }

    ctx.result.http_methods = Some(report);
}
