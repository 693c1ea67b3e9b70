//! Engine configuration.
//!
//! `EngineConfig` is resolved once (from the environment or by the caller)
//! and is read-only after `Engine::new`. Per-check state never mutates it;
//! the detection phase threads its echo URL through local values instead
//! of rewriting the shared validation URL.

mod advanced;
pub(crate) mod helpers;

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

pub use advanced::AdvancedChecks;

use crate::config::helpers::{optional_bool_env, optional_env, optional_list_env, parse_optional_env};
use crate::error::ConfigError;

/// Default overall per-request budget.
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default validation target; a plaintext echo that reflects the egress IP.
const DEFAULT_VALIDATION_URL: &str = "http://api.ipify.org?format=json";
/// Browser-shaped default so probe traffic blends with ordinary clients.
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Proxy authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Basic,
    Digest,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Basic => write!(f, "basic"),
            AuthMethod::Digest => write!(f, "digest"),
        }
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthMethod::Basic),
            "digest" => Ok(AuthMethod::Digest),
            other => Err(format!("unsupported auth method '{other}'")),
        }
    }
}

/// Configuration for the per-proxy probing engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Overall per-request budget.
    pub timeout: Duration,
    /// Final success-criterion URL for the validation runner.
    pub validation_url: String,

    /// Response-body substrings that fail validation when present.
    pub disallowed_keywords: Vec<String>,
    /// Minimum acceptable validation body size in bytes.
    pub min_response_bytes: usize,
    /// When set, the validation status must equal this exactly.
    pub require_status_code: Option<u16>,
    /// When set, the validation body must contain this substring.
    pub require_content_match: Option<String>,
    /// Response headers that must be present and non-empty.
    pub require_header_fields: Vec<String>,

    /// Headers attached to every outgoing probe.
    pub default_headers: HashMap<String, String>,
    /// User-Agent for all probe traffic.
    pub user_agent: String,
    /// Reverse-resolve the proxy host and record the PTR name.
    pub use_rdns: bool,

    /// Enforce minimum inter-request spacing.
    pub rate_limit_enabled: bool,
    /// Minimum spacing between requests sharing a rate-limit key.
    pub rate_limit_delay: Duration,
    /// Key rate limiting by target hostname.
    pub rate_limit_per_host: bool,
    /// Key rate limiting by full proxy URL (takes priority over per-host).
    pub rate_limit_per_proxy: bool,

    /// Retry the validation request on transient failures.
    pub retry_enabled: bool,
    /// Additional attempts after the first (capped at 10).
    pub max_retries: u32,
    /// First backoff delay.
    pub initial_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub backoff_factor: f64,
    /// Extra substrings classified as retryable; empty uses the built-ins.
    pub retryable_errors: Vec<String>,

    /// Apply configured credentials to proxies without URL userinfo.
    pub auth_enabled: bool,
    /// Default proxy username.
    pub default_username: String,
    /// Default proxy password.
    pub default_password: SecretString,
    /// Permitted auth methods; filtered to basic/digest, empty means basic.
    pub auth_methods: Vec<AuthMethod>,

    /// Probe for HTTP/2 support over https candidates.
    pub enable_http2: bool,
    /// Sniff Alt-Svc for h3 advertisement (no QUIC transport).
    pub enable_http3: bool,
    /// Run the software fingerprint sub-protocol.
    pub enable_fingerprint: bool,
    /// Run cloud-provider metadata and CDN probes.
    pub enable_cloud_checks: bool,

    /// Per-family probe enablement.
    pub advanced: AdvancedChecks,

    /// Interactsh-style OOB server URL; empty disables the oracle.
    pub interactsh_url: String,
    /// Optional OOB server token.
    pub interactsh_token: Option<SecretString>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            validation_url: DEFAULT_VALIDATION_URL.to_string(),
            disallowed_keywords: Vec::new(),
            min_response_bytes: 0,
            require_status_code: None,
            require_content_match: None,
            require_header_fields: Vec::new(),
            default_headers: HashMap::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_rdns: false,
            rate_limit_enabled: false,
            rate_limit_delay: Duration::from_secs(1),
            rate_limit_per_host: false,
            rate_limit_per_proxy: false,
            retry_enabled: false,
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retryable_errors: Vec::new(),
            auth_enabled: false,
            default_username: String::new(),
            default_password: SecretString::from(String::new()),
            auth_methods: Vec::new(),
            enable_http2: false,
            enable_http3: false,
            enable_fingerprint: false,
            enable_cloud_checks: false,
            advanced: AdvancedChecks::default(),
            interactsh_url: String::new(),
            interactsh_token: None,
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timeout_secs = parse_optional_env("CHECK_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let rate_limit_ms = parse_optional_env(
            "RATE_LIMIT_DELAY_MS",
            defaults.rate_limit_delay.as_millis() as u64,
        )?;
        let initial_delay_ms = parse_optional_env(
            "RETRY_INITIAL_DELAY_MS",
            defaults.initial_delay.as_millis() as u64,
        )?;
        let max_delay_ms =
            parse_optional_env("RETRY_MAX_DELAY_MS", defaults.max_delay.as_millis() as u64)?;

        let auth_methods = optional_list_env("PROXY_AUTH_METHODS")?
            .unwrap_or_default()
            .iter()
            // Unknown method names are dropped rather than fatal.
            .filter_map(|m| m.parse().ok())
            .collect();

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            validation_url: optional_env("VALIDATION_URL")?.unwrap_or(defaults.validation_url),
            disallowed_keywords: optional_list_env("DISALLOWED_KEYWORDS")?.unwrap_or_default(),
            min_response_bytes: parse_optional_env("MIN_RESPONSE_BYTES", 0usize)?,
            require_status_code: optional_env("REQUIRE_STATUS_CODE")?
                .map(|s| {
                    s.parse().map_err(|e| ConfigError::InvalidValue {
                        key: "REQUIRE_STATUS_CODE".to_string(),
                        message: format!("must be an HTTP status code: {e}"),
                    })
                })
                .transpose()?,
            require_content_match: optional_env("REQUIRE_CONTENT_MATCH")?,
            require_header_fields: optional_list_env("REQUIRE_HEADER_FIELDS")?.unwrap_or_default(),
            // "Name: Value; Name2: Value2"
            default_headers: optional_env("DEFAULT_HEADERS")?
                .map(|raw| {
                    raw.split(';')
                        .filter_map(|pair| {
                            pair.split_once(':')
                                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                        })
                        .filter(|(n, _)| !n.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            user_agent: optional_env("PROBE_USER_AGENT")?.unwrap_or(defaults.user_agent),
            use_rdns: optional_bool_env("USE_RDNS", defaults.use_rdns)?,
            rate_limit_enabled: optional_bool_env("RATE_LIMIT_ENABLED", false)?,
            rate_limit_delay: Duration::from_millis(rate_limit_ms),
            rate_limit_per_host: optional_bool_env("RATE_LIMIT_PER_HOST", false)?,
            rate_limit_per_proxy: optional_bool_env("RATE_LIMIT_PER_PROXY", false)?,
            retry_enabled: optional_bool_env("RETRY_ENABLED", false)?,
            max_retries: parse_optional_env("MAX_RETRIES", defaults.max_retries)?,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_factor: parse_optional_env("RETRY_BACKOFF_FACTOR", defaults.backoff_factor)?,
            retryable_errors: optional_list_env("RETRYABLE_ERRORS")?.unwrap_or_default(),
            auth_enabled: optional_bool_env("PROXY_AUTH_ENABLED", false)?,
            default_username: optional_env("PROXY_AUTH_USERNAME")?.unwrap_or_default(),
            default_password: SecretString::from(
                optional_env("PROXY_AUTH_PASSWORD")?.unwrap_or_default(),
            ),
            auth_methods,
            enable_http2: optional_bool_env("ENABLE_HTTP2", false)?,
            enable_http3: optional_bool_env("ENABLE_HTTP3", false)?,
            enable_fingerprint: optional_bool_env("ENABLE_FINGERPRINT", false)?,
            enable_cloud_checks: optional_bool_env("ENABLE_CLOUD_CHECKS", false)?,
            advanced: AdvancedChecks::resolve()?,
            interactsh_url: optional_env("INTERACTSH_URL")?.unwrap_or_default(),
            interactsh_token: optional_env("INTERACTSH_TOKEN")?.map(SecretString::from),
        })
    }

    /// Clamp and default the tunable fields.
    ///
    /// Called once at engine construction so every later consumer can rely
    /// on the invariants: timeout > 0, 0 < max_retries <= 10,
    /// initial_delay > 0, max_delay >= initial_delay, backoff_factor > 1.
    pub fn normalized(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        }
        if self.max_retries == 0 {
            self.max_retries = 3;
        }
        self.max_retries = self.max_retries.min(10);
        if self.initial_delay.is_zero() {
            self.initial_delay = Duration::from_secs(1);
        }
        if self.max_delay.is_zero() {
            self.max_delay = Duration::from_secs(30);
        }
        if self.max_delay < self.initial_delay {
            self.max_delay = self.initial_delay;
        }
        if self.backoff_factor <= 1.0 {
            self.backoff_factor = 2.0;
        }
        if self.rate_limit_delay.is_zero() {
            self.rate_limit_delay = Duration::from_secs(1);
        }
        self.auth_methods
            .retain(|m| matches!(m, AuthMethod::Basic | AuthMethod::Digest));
        if self.auth_methods.is_empty() {
            self.auth_methods = vec![AuthMethod::Basic];
        }
        self
    }

    /// The outer deadline for one validation attempt chain.
    pub fn overall_deadline(&self) -> Duration {
        if self.retry_enabled {
            self.timeout * (self.max_retries + 1)
        } else {
            self.timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_substitutes_defaults_for_zero_fields() {
        let config = EngineConfig {
            timeout: Duration::ZERO,
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 0.0,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_factor, 2.0);
    }

    #[test]
    fn test_normalized_caps_retries_and_orders_delays() {
        let config = EngineConfig {
            max_retries: 25,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(2),
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.max_retries, 10);
        assert_eq!(config.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_normalized_defaults_auth_methods_to_basic() {
        let config = EngineConfig::default().normalized();
        assert_eq!(config.auth_methods, vec![AuthMethod::Basic]);
    }

    #[test]
    fn test_overall_deadline_scales_with_retries() {
        let config = EngineConfig {
            timeout: Duration::from_secs(10),
            retry_enabled: true,
            max_retries: 3,
            ..Default::default()
        };
        assert_eq!(config.overall_deadline(), Duration::from_secs(40));

        let no_retry = EngineConfig {
            retry_enabled: false,
            ..config
        };
        assert_eq!(no_retry.overall_deadline(), Duration::from_secs(10));
    }

    #[test]
    fn test_auth_method_parsing() {
        assert_eq!("Basic".parse::<AuthMethod>().unwrap(), AuthMethod::Basic);
        assert_eq!("digest".parse::<AuthMethod>().unwrap(), AuthMethod::Digest);
        assert!("ntlm".parse::<AuthMethod>().is_err());
    }
}
