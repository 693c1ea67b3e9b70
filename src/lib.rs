//! proxyprobe — forward-proxy validation and security audit engine.
//!
//! Takes a candidate proxy URL and produces a structured [`ProxyResult`]:
//! does it work as a forward proxy, over which protocols, at what latency,
//! with what anonymity level, running which software, and exhibiting which
//! misconfigurations. The per-proxy engine is single-threaded by design;
//! concurrency across proxies belongs to the caller, and
//! [`Engine::check`] is safe to invoke from many tasks at once.
//!
//! ```no_run
//! use std::sync::Arc;
//! use proxyprobe::{Engine, EngineConfig, TracingLogger};
//!
//! # async fn demo() -> Result<(), proxyprobe::CheckError> {
//! let engine = Engine::new(EngineConfig::default(), false, Arc::new(TracingLogger)).await?;
//! let result = engine.check("socks5://127.0.0.1:1080").await;
//! println!("{} working={}", result.kind, result.working);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod detect;
pub mod directscan;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod probe;
pub mod ratelimit;
pub mod report;
pub mod retry;
pub mod validate;

pub use client::{ClientFactory, ConnectionPool, ProxyAuth, ProxyEndpoint, ProxyScheme};
pub use config::{AdvancedChecks, AuthMethod, EngineConfig};
pub use engine::{Engine, Logger, TracingLogger};
pub use error::{CheckError, ConfigError};
pub use oracle::{Interaction, OracleHandle};
pub use report::{
    AnonymityLevel, CheckResult, Finding, Fingerprint, ProxyKind, ProxyResult, Severity,
};
