//! Crate-wide error type.
//!
//! # Design Decisions
//! - Configuration faults surface at startup/registration, never per request
//! - Per-request failures are aborts on the Context, not `Error` values
//! - Subsystem errors (`ConfigError`, `ProxyError`) convert via `From`

use crate::config::loader::ConfigError;
use crate::net::ListenerError;
use crate::proxy::ProxyError;

/// Boxed error stored on a Context by `record_error`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building or running a router.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid route {pattern:?}: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("invalid rewrite rule {rule:?}: {source}")]
    InvalidRewrite {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("load balancer error: {0}")]
    Balancer(String),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl Error {
    pub(crate) fn invalid_route(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidRoute {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
