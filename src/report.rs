//! Report types assembled while probing a single proxy.
//!
//! `ProxyResult` is the engine's sole output. It is constructed empty at
//! engine entry, mutated only by the per-proxy orchestrator and its
//! callees, and returned by move at exit. Every nested type serializes to
//! JSON with explicit snake_case names so callers can emit results
//! directly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol family a candidate endpoint speaks as a forward proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Unknown,
    Http,
    Https,
    Http2,
    Http3,
    Socks4,
    Socks5,
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyKind::Unknown => write!(f, "unknown"),
            ProxyKind::Http => write!(f, "http"),
            ProxyKind::Https => write!(f, "https"),
            ProxyKind::Http2 => write!(f, "http2"),
            ProxyKind::Http3 => write!(f, "http3"),
            ProxyKind::Socks4 => write!(f, "socks4"),
            ProxyKind::Socks5 => write!(f, "socks5"),
        }
    }
}

/// How much a proxy reveals about the originating client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymityLevel {
    /// Reflected IP equals the caller's own IP.
    Transparent,
    /// Different egress IP but proxy-identifying headers are visible.
    Anonymous,
    /// Different egress IP and no proxy-identifying headers.
    Elite,
    /// A leak predicate fired: the caller IP escapes despite the proxy.
    Compromised,
    Unknown,
}

impl std::fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnonymityLevel::Transparent => write!(f, "transparent"),
            AnonymityLevel::Anonymous => write!(f, "anonymous"),
            AnonymityLevel::Elite => write!(f, "elite"),
            AnonymityLevel::Compromised => write!(f, "compromised"),
            AnonymityLevel::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of a single probe request, appended in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// The URL that was requested.
    pub url: String,
    /// Whether the probe succeeded by its own criterion.
    pub success: bool,
    /// Wall time for the probe in milliseconds.
    pub elapsed_ms: f64,
    /// Error message when the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// HTTP status when a response arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response body size when a body was read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_size: Option<usize>,
}

impl CheckResult {
    pub fn success(url: impl Into<String>, elapsed: Duration, status: u16, body_size: usize) -> Self {
        Self {
            url: url.into(),
            success: true,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            error: None,
            status: Some(status),
            body_size: Some(body_size),
        }
    }

    pub fn failure(url: impl Into<String>, elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            error: Some(error.into()),
            status: None,
            body_size: None,
        }
    }

    /// A failure that still carries the received status (predicate failures).
    pub fn failure_with_status(
        url: impl Into<String>,
        elapsed: Duration,
        status: u16,
        error: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            success: false,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            error: Some(error.into()),
            status: Some(status),
            body_size: None,
        }
    }
}

/// Identified proxy software.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Software name (nginx, squid, ...) or "unknown".
    pub software: String,
    /// Version when extractable from headers or error pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Indicator-weighted confidence, always within [0, 1].
    pub confidence: f64,
}

impl Fingerprint {
    pub fn unknown() -> Self {
        Self {
            software: "unknown".to_string(),
            version: None,
            confidence: 0.0,
        }
    }
}

/// Severity attached to a vulnerability finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// One confirmed or suspected vulnerability indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Short identifier, e.g. "CVE-2021-40438" or "stats-page-exposure".
    pub check: String,
    /// The URL or request shape that triggered the finding.
    pub url: String,
    /// What was observed in the response.
    pub evidence: String,
    pub severity: Severity,
}

impl Finding {
    pub fn new(
        check: impl Into<String>,
        url: impl Into<String>,
        evidence: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            check: check.into(),
            url: url.into(),
            evidence: evidence.into(),
            severity,
        }
    }
}

/// CL+TE request smuggling family report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmugglingReport {
    /// A CL+TE request was accepted with status < 400.
    pub cl_te_accepted: bool,
    pub findings: Vec<Finding>,
}

/// DNS rebinding family report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebindingReport {
    /// The second (rebound) request connected or was refused by an
    /// internal address.
    pub vulnerable: bool,
    pub findings: Vec<Finding>,
}

/// IPv6 connectivity family report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ipv6Report {
    /// The proxy attempted an IPv6 connection on our behalf.
    pub attempted: bool,
    pub findings: Vec<Finding>,
}

/// Per-method status observed against the validation URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodStatus {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// HTTP-methods family report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodsReport {
    pub results: Vec<MethodStatus>,
}

/// Cache poisoning family report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachePoisoningReport {
    /// A marker sent in an unkeyed header reflected in a later clean response.
    pub vulnerable: bool,
    /// The header that carried the reflected marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poisoned_header: Option<String>,
    pub findings: Vec<Finding>,
}

/// Host header injection family report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostHeaderReport {
    pub vulnerable: bool,
    /// Internal targets the endpoint accepted in a host-carrying header.
    pub accepted_targets: Vec<String>,
    pub findings: Vec<Finding>,
}

/// Basic SSRF family report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SsrfReport {
    pub vulnerable: bool,
    /// Internal targets that answered through the proxy.
    pub accessible_targets: Vec<String>,
    pub findings: Vec<Finding>,
}

/// Advanced SSRF family report: one flag per sub-check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvancedSsrfReport {
    pub parser_differential: bool,
    pub ip_obfuscation: bool,
    pub redirect_chain: bool,
    pub protocol_smuggling: bool,
    pub header_injection: bool,
    pub proxy_pass_traversal: bool,
    pub host_header_ssrf: bool,
    pub sni_proxy: bool,
    pub dns_rebinding: bool,
    pub http2_crlf_injection: bool,
    pub imdsv2_bypass: bool,
    pub url_encoding_bypass: bool,
    pub multiple_host_headers: bool,
    pub cloud_metadata_headers: bool,
    pub port_specification: bool,
    pub fragment_manipulation: bool,
    pub findings: Vec<Finding>,
}

impl AdvancedSsrfReport {
    /// True when any sub-check fired.
    pub fn any(&self) -> bool {
        self.parser_differential
            || self.ip_obfuscation
            || self.redirect_chain
            || self.protocol_smuggling
            || self.header_injection
            || self.proxy_pass_traversal
            || self.host_header_ssrf
            || self.sni_proxy
            || self.dns_rebinding
            || self.http2_crlf_injection
            || self.imdsv2_bypass
            || self.url_encoding_bypass
            || self.multiple_host_headers
            || self.cloud_metadata_headers
            || self.port_specification
            || self.fragment_manipulation
    }
}

/// Report for one vendor-specific probe module (nginx, squid, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorReport {
    /// Extracted version when the vendor discloses one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub findings: Vec<Finding>,
}

impl VendorReport {
    pub fn vulnerable(&self) -> bool {
        self.findings.iter().any(|f| f.severity > Severity::Info)
    }
}

/// The assembling per-proxy report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyResult {
    /// The input URL, echoed back.
    pub proxy_url: String,
    pub kind: ProxyKind,
    /// True iff the validation runner succeeded through a proxy client.
    pub working: bool,
    /// End-to-end validation latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    pub supports_http: bool,
    pub supports_https: bool,
    pub supports_http2: bool,
    pub supports_http3: bool,
    pub anonymity: AnonymityLevel,
    /// The egress IP the echo service observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_ip: Option<String>,
    /// Proxy-identifying headers present in echo responses.
    pub leaking_headers: Vec<String>,
    /// Multiple proxy hops detected via Via / X-Forwarded-For.
    pub chain_detected: bool,
    /// PTR name for the proxy host when rDNS is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,

    /// Every probe outcome in execution order. Append-only.
    pub checks: Vec<CheckResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub smuggling: Option<SmugglingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_rebinding: Option<RebindingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_methods: Option<MethodsReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_poisoning: Option<CachePoisoningReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_header_injection: Option<HostHeaderReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssrf: Option<SsrfReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_ssrf: Option<AdvancedSsrfReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nginx: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apache: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub haproxy: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squid: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traefik: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envoy: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caddy: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub varnish: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kong: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<VendorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended: Option<VendorReport>,

    /// Warnings about the check itself (e.g. TLS verification disabled).
    pub security_warnings: Vec<String>,
    /// Phase-by-phase narration; empty unless debug was enabled.
    pub debug_trace: String,
    /// Terminal error classification when the check could not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProxyResult {
    /// Construct the empty report at engine entry.
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            kind: ProxyKind::Unknown,
            working: false,
            latency_ms: None,
            supports_http: false,
            supports_https: false,
            supports_http2: false,
            supports_http3: false,
            anonymity: AnonymityLevel::Unknown,
            egress_ip: None,
            leaking_headers: Vec::new(),
            chain_detected: false,
            rdns: None,
            fingerprint: None,
            checks: Vec::new(),
            smuggling: None,
            dns_rebinding: None,
            ipv6: None,
            http_methods: None,
            cache_poisoning: None,
            host_header_injection: None,
            ssrf: None,
            advanced_ssrf: None,
            nginx: None,
            apache: None,
            haproxy: None,
            squid: None,
            traefik: None,
            envoy: None,
            caddy: None,
            varnish: None,
            kong: None,
            generic: None,
            cloud: None,
            extended: None,
            security_warnings: Vec::new(),
            debug_trace: String::new(),
            error: None,
            checked_at: Utc::now(),
        }
    }

    /// Append a probe outcome. Order reflects execution and is never
    /// rewritten.
    pub fn record_check(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    /// Record a warning about the check itself, deduplicated.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.security_warnings.contains(&warning) {
            self.security_warnings.push(warning);
        }
    }

    /// Append a line to the debug trace.
    pub fn trace(&mut self, line: &str) {
        self.debug_trace.push_str(line);
        self.debug_trace.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_results_preserve_order() {
        let mut result = ProxyResult::new("http://127.0.0.1:8080");
        result.record_check(CheckResult::failure("http://a", Duration::from_millis(5), "x"));
        result.record_check(CheckResult::success("http://b", Duration::from_millis(7), 200, 12));

        assert_eq!(result.checks.len(), 2);
        assert_eq!(result.checks[0].url, "http://a");
        assert_eq!(result.checks[1].url, "http://b");
    }

    #[test]
    fn test_warnings_deduplicate() {
        let mut result = ProxyResult::new("http://127.0.0.1:8080");
        result.push_warning("TLS verification disabled");
        result.push_warning("TLS verification disabled");
        assert_eq!(result.security_warnings.len(), 1);
    }

    #[test]
    fn test_result_serializes_with_snake_case_fields() {
        let result = ProxyResult::new("socks5://127.0.0.1:1080");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["proxy_url"], "socks5://127.0.0.1:1080");
        assert_eq!(json["kind"], "unknown");
        assert_eq!(json["working"], false);
        // Unset families are omitted entirely.
        assert!(json.get("nginx").is_none());
    }

    #[test]
    fn test_vendor_report_vulnerable_ignores_info_findings() {
        let mut report = VendorReport::default();
        report.findings.push(Finding::new(
            "version-disclosure",
            "http://x/",
            "Server: nginx/1.18.0",
            Severity::Info,
        ));
        assert!(!report.vulnerable());

        report.findings.push(Finding::new(
            "alias-traversal",
            "http://x/static../etc/passwd",
            "root:x:0:0",
            Severity::Critical,
        ));
        assert!(report.vulnerable());
    }
}
