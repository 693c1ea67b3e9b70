//! Anonymity classification and proxy-chain detection.
//!
//! Compares the IP an echo service sees through the proxy against the
//! caller's own egress IP (obtained by a direct control request), then
//! inspects the proxied response for proxy-identifying headers.

use serde_json::Value;

use crate::probe::ProbeContext;
use crate::report::AnonymityLevel;

/// Headers that disclose the presence (or the client) of a proxy.
const PROXY_HEADERS: &[&str] = &[
    "Via",
    "X-Forwarded-For",
    "X-Real-IP",
    "X-Proxy-ID",
    "Forwarded",
];

/// Pull an IP out of an echo response body.
///
/// Accepts the JSON shapes of the common echo services (`{"ip": "..."}`)
/// and falls back to treating the trimmed body as a bare address.
pub fn parse_echo_ip(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["ip", "origin", "address"] {
            if let Some(ip) = value.get(key).and_then(|v| v.as_str()) {
                return Some(ip.trim().to_string());
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.parse::<std::net::IpAddr>().is_ok() {
        return Some(trimmed.to_string());
    }
    None
}

/// Run the anonymity sub-protocol and write the classification onto the
/// result.
///
/// `caller_ip` comes from a control request issued without the proxy; when
/// unavailable the level degrades to the header-only classification.
pub async fn run(ctx: &mut ProbeContext<'_>, echo_url: &str, caller_ip: Option<&str>) {
    let response = match ctx.get(echo_url).await {
        Ok(r) => r,
        Err(_) => {
            ctx.result.anonymity = AnonymityLevel::Unknown;
            return;
        }
    };

    let reflected_ip = parse_echo_ip(&response.body);
    ctx.result.egress_ip = reflected_ip.clone();

    let mut leaking = Vec::new();
    for name in PROXY_HEADERS {
        if response.headers.contains_key(*name) {
            leaking.push((*name).to_string());
        }
    }

    // Chain: multiple Via hops or a multi-address X-Forwarded-For.
    let via_hops = response
        .header("Via")
        .map(|v| v.split(',').filter(|h| !h.trim().is_empty()).count())
        .unwrap_or(0);
    let xff_addrs = response
        .header("X-Forwarded-For")
        .map(|v| v.split(',').filter(|h| !h.trim().is_empty()).count())
        .unwrap_or(0);
    ctx.result.chain_detected = via_hops >= 2 || xff_addrs >= 2;

    // Compromised: any header value (or the echo body) discloses the
    // caller IP even though traffic went through the proxy.
    let leaked_caller_ip = caller_ip.is_some_and(|ip| {
        !ip.is_empty()
            && PROXY_HEADERS.iter().any(|name| {
                response.header(name).is_some_and(|value| value.contains(ip))
            })
    });

    ctx.result.anonymity = match (caller_ip, &reflected_ip) {
        _ if leaked_caller_ip => AnonymityLevel::Compromised,
        (Some(caller), Some(reflected)) if caller == reflected.as_str() => {
            AnonymityLevel::Transparent
        }
        (Some(_), Some(_)) if !leaking.is_empty() => AnonymityLevel::Anonymous,
        (Some(_), Some(_)) => AnonymityLevel::Elite,
        // Without a control IP the best signal is header presence.
        (None, Some(_)) if leaking.is_empty() => AnonymityLevel::Elite,
        (None, Some(_)) => AnonymityLevel::Anonymous,
        _ => AnonymityLevel::Unknown,
    };

    ctx.result.leaking_headers = leaking;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_echo_ip_json_shapes() {
        assert_eq!(
            parse_echo_ip(r#"{"ip":"203.0.113.9"}"#),
            Some("203.0.113.9".to_string())
        );
        assert_eq!(
            parse_echo_ip(r#"{"origin": "198.51.100.4"}"#),
            Some("198.51.100.4".to_string())
        );
    }

    #[test]
    fn test_parse_echo_ip_bare_body() {
        assert_eq!(parse_echo_ip("  192.0.2.55\n"), Some("192.0.2.55".to_string()));
        assert_eq!(parse_echo_ip("2001:db8::1"), Some("2001:db8::1".to_string()));
        assert_eq!(parse_echo_ip("<html>hi</html>"), None);
    }
}
