//! Per-family enable flags for the vulnerability probe catalogue.

use crate::config::helpers::{optional_bool_env, optional_list_env};
use crate::error::ConfigError;

/// Which probe families run during the advanced phase.
///
/// Every family defaults to off; a disabled family emits no network
/// traffic at all. `test_http_methods` doubles as its own enable flag:
/// an empty list skips the family.
#[derive(Debug, Clone)]
pub struct AdvancedChecks {
    /// CL+TE protocol smuggling probes.
    pub test_protocol_smuggling: bool,
    /// DNS rebinding probes against alternating-resolution domains.
    pub test_dns_rebinding: bool,
    /// IPv6 connectivity probe.
    pub test_ipv6: bool,
    /// Unkeyed-header cache poisoning probes.
    pub test_cache_poisoning: bool,
    /// Host header injection matrix.
    pub test_host_header_injection: bool,
    /// Basic and advanced SSRF probes.
    pub test_ssrf: bool,
    /// HTTP methods to exercise against the validation URL.
    pub test_http_methods: Vec<String>,
    /// Nginx-specific CVE and exposure probes.
    pub test_nginx_vulnerabilities: bool,
    /// Apache-specific CVE and exposure probes.
    pub test_apache_vulnerabilities: bool,
    /// Kong admin-surface probes.
    pub test_kong_vulnerabilities: bool,
    /// Generic open-proxy, ACL-bypass and framework probes.
    pub test_generic_vulnerabilities: bool,
    /// WebSocket, HTTP/2 smuggling and proxy-auth bypass probes.
    pub test_extended_vulnerabilities: bool,
    /// HAProxy/Squid/Traefik/Envoy/Caddy/Varnish vendor probes.
    pub test_vendor_vulnerabilities: bool,
    /// Skip the OOB oracle even when a server is configured.
    pub disable_interactsh: bool,
}

impl Default for AdvancedChecks {
    fn default() -> Self {
        Self {
            test_protocol_smuggling: false,
            test_dns_rebinding: false,
            test_ipv6: false,
            test_cache_poisoning: false,
            test_host_header_injection: false,
            test_ssrf: false,
            test_http_methods: Vec::new(),
            test_nginx_vulnerabilities: false,
            test_apache_vulnerabilities: false,
            test_kong_vulnerabilities: false,
            test_generic_vulnerabilities: false,
            test_extended_vulnerabilities: false,
            test_vendor_vulnerabilities: false,
            disable_interactsh: false,
        }
    }
}

impl AdvancedChecks {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            test_protocol_smuggling: optional_bool_env(
                "TEST_PROTOCOL_SMUGGLING",
                defaults.test_protocol_smuggling,
            )?,
            test_dns_rebinding: optional_bool_env("TEST_DNS_REBINDING", defaults.test_dns_rebinding)?,
            test_ipv6: optional_bool_env("TEST_IPV6", defaults.test_ipv6)?,
            test_cache_poisoning: optional_bool_env(
                "TEST_CACHE_POISONING",
                defaults.test_cache_poisoning,
            )?,
            test_host_header_injection: optional_bool_env(
                "TEST_HOST_HEADER_INJECTION",
                defaults.test_host_header_injection,
            )?,
            test_ssrf: optional_bool_env("TEST_SSRF", defaults.test_ssrf)?,
            test_http_methods: optional_list_env("TEST_HTTP_METHODS")?.unwrap_or_default(),
            test_nginx_vulnerabilities: optional_bool_env(
                "TEST_NGINX_VULNERABILITIES",
                defaults.test_nginx_vulnerabilities,
            )?,
            test_apache_vulnerabilities: optional_bool_env(
                "TEST_APACHE_VULNERABILITIES",
                defaults.test_apache_vulnerabilities,
            )?,
            test_kong_vulnerabilities: optional_bool_env(
                "TEST_KONG_VULNERABILITIES",
                defaults.test_kong_vulnerabilities,
            )?,
            test_generic_vulnerabilities: optional_bool_env(
                "TEST_GENERIC_VULNERABILITIES",
                defaults.test_generic_vulnerabilities,
            )?,
            test_extended_vulnerabilities: optional_bool_env(
                "TEST_EXTENDED_VULNERABILITIES",
                defaults.test_extended_vulnerabilities,
            )?,
            test_vendor_vulnerabilities: optional_bool_env(
                "TEST_VENDOR_VULNERABILITIES",
                defaults.test_vendor_vulnerabilities,
            )?,
            disable_interactsh: optional_bool_env("DISABLE_INTERACTSH", defaults.disable_interactsh)?,
        })
    }

    /// Check if any probe family is enabled.
    ///
    /// Drives both the advanced phase and the direct-scan fallback: when
    /// nothing is enabled, a dead proxy terminates without a fallback scan.
    pub fn any_enabled(&self) -> bool {
        self.test_protocol_smuggling
            || self.test_dns_rebinding
            || self.test_ipv6
            || self.test_cache_poisoning
            || self.test_host_header_injection
            || self.test_ssrf
            || !self.test_http_methods.is_empty()
            || self.test_nginx_vulnerabilities
            || self.test_apache_vulnerabilities
            || self.test_kong_vulnerabilities
            || self.test_generic_vulnerabilities
            || self.test_extended_vulnerabilities
            || self.test_vendor_vulnerabilities
    }

    /// Enable every family. Used by scan-everything callers and tests.
    pub fn all_enabled() -> Self {
        Self {
            test_protocol_smuggling: true,
            test_dns_rebinding: true,
            test_ipv6: true,
            test_cache_poisoning: true,
            test_host_header_injection: true,
            test_ssrf: true,
            test_http_methods: ["GET", "POST", "PUT", "DELETE", "PATCH"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            test_nginx_vulnerabilities: true,
            test_apache_vulnerabilities: true,
            test_kong_vulnerabilities: true,
            test_generic_vulnerabilities: true,
            test_extended_vulnerabilities: true,
            test_vendor_vulnerabilities: true,
            disable_interactsh: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_everything() {
        let checks = AdvancedChecks::default();
        assert!(!checks.any_enabled());
    }

    #[test]
    fn test_http_methods_list_counts_as_enabled() {
        let checks = AdvancedChecks {
            test_http_methods: vec!["GET".to_string()],
            ..Default::default()
        };
        assert!(checks.any_enabled());
    }

    #[test]
    fn test_disable_interactsh_does_not_count_as_enabled() {
        let checks = AdvancedChecks {
            disable_interactsh: true,
            ..Default::default()
        };
        assert!(!checks.any_enabled());
    }
}
