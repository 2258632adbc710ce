//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::load_balancer::BalancerKind;
use crate::routing::RouterOptions;

/// Root configuration for the gateway binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS, Unix socket).
    pub listener: ListenerConfig,

    /// Router behaviour switches.
    pub router: RouterConfig,

    /// Log level and output format.
    pub logging: LoggingConfig,

    /// Reverse proxy routes.
    pub proxies: Vec<ProxyRouteConfig>,

    /// Directories served as static files.
    pub static_files: Vec<StaticFilesConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Serve on this Unix socket instead of TCP.
    pub unix_socket: Option<PathBuf>,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Upper bound on the graceful drain.
    pub shutdown_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            unix_socket: None,
            tls: None,
            shutdown_timeout_secs: 60,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Answer 405 when another method matches the path.
    pub handle_method_not_allowed: bool,

    /// Collapse `//` and resolve `.`/`..` before matching.
    pub remove_extra_slash: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let options = RouterOptions::default();
        Self {
            handle_method_not_allowed: options.handle_method_not_allowed,
            remove_extra_slash: options.remove_extra_slash,
        }
    }
}

impl From<&RouterConfig> for RouterOptions {
    fn from(config: &RouterConfig) -> Self {
        RouterOptions {
            handle_method_not_allowed: config.handle_method_not_allowed,
            remove_extra_slash: config.remove_extra_slash,
            ..RouterOptions::default()
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// One proxied route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyRouteConfig {
    /// Route pattern (`/api/*path`, `= /exact`, `~ /priority/:id`).
    pub pattern: String,

    /// Methods to register; empty means all.
    #[serde(default)]
    pub methods: Vec<String>,

    #[serde(default)]
    pub balancer: BalancerKind,

    pub targets: Vec<TargetConfig>,

    /// Ordered glob rewrite rules.
    #[serde(default)]
    pub rewrite: Vec<RewriteConfig>,
}

/// Upstream target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Unique identifier within the route.
    pub name: String,

    /// Upstream base URL (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Required by weighted balancers.
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticFilesConfig {
    /// URL prefix; must not contain parameters.
    pub prefix: String,

    /// Directory on disk.
    pub root: PathBuf,
}
