//! Error types for the probing engine.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the engine and its subsystems.
///
/// Every variant maps to one semantic failure class; per-probe errors are
/// recorded on the result rather than propagated, so only URL parsing and
/// type detection ever abort a check.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The candidate proxy URL could not be parsed.
    #[error("Invalid proxy URL '{url}': {reason}")]
    InvalidProxyUrl {
        /// The offending input.
        url: String,
        /// Parse failure detail.
        reason: String,
    },

    /// No candidate scheme produced a working proxy client.
    #[error("Proxy is not working: {reason}")]
    ProxyNotWorking {
        /// Composite detail listing the last failure per candidate.
        reason: String,
    },

    /// A network or transport failure during a probe.
    #[error("HTTP request to {url} failed: {reason}")]
    RequestFailed {
        /// Request target.
        url: String,
        /// Transport-level detail.
        reason: String,
        /// Classified transient at the transport layer (timeout/connect
        /// flags, wrapped URL errors); carried so the retry engine does
        /// not depend on message text alone.
        transient: bool,
    },

    /// A response arrived but violated a status predicate.
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus {
        /// Request target.
        url: String,
        /// The status that violated the predicate.
        status: u16,
    },

    /// The validation request or its predicates failed.
    #[error("Validation failed: {reason}")]
    ValidationFailed {
        /// Which predicate failed and how.
        reason: String,
    },

    /// The out-of-band interaction oracle could not be used.
    #[error("Interaction oracle unavailable: {reason}")]
    OracleUnavailable {
        /// Initialization or polling failure detail.
        reason: String,
    },

    /// The outer retry deadline elapsed before the operation settled.
    #[error("Deadline of {deadline:?} exceeded")]
    DeadlineExceeded {
        /// The deadline that was in force.
        deadline: Duration,
    },

    /// An HTTP client could not be constructed.
    #[error("Failed to build HTTP client for {scheme}: {reason}")]
    ClientBuild {
        /// Proxy scheme the client was for.
        scheme: String,
        /// Builder failure detail.
        reason: String,
    },
}

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value of the wrong shape.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// An environment variable was not valid unicode.
    #[error("Environment variable {key} is not valid unicode")]
    NotUnicode {
        /// Environment variable name.
        key: String,
    },
}
