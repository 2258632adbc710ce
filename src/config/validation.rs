//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every proxy route can actually forward somewhere
//! - Validate value ranges (weights, timeouts, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use axum::http::Method;
use url::Url;

use crate::config::schema::{GatewayConfig, ProxyRouteConfig};
use crate::load_balancer::BalancerKind;

/// One semantic problem, located by a dotted path into the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.unix_socket.is_none() && listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", listener.bind_address),
        ));
    }
    if let Some(tls) = &listener.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
        if listener.unix_socket.is_some() {
            errors.push(ValidationError::new(
                "listener.tls",
                "TLS is not supported on Unix sockets",
            ));
        }
    }
    if listener.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "listener.shutdown_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.logging.level.trim().is_empty() {
        errors.push(ValidationError::new("logging.level", "must not be empty"));
    }

    for (i, proxy) in config.proxies.iter().enumerate() {
        validate_proxy(&format!("proxies[{i}]"), proxy, &mut errors);
    }

    for (i, files) in config.static_files.iter().enumerate() {
        let field = format!("static_files[{i}].prefix");
        if !files.prefix.starts_with('/') {
            errors.push(ValidationError::new(&field, "must start with '/'"));
        }
        if files.prefix.contains(':') || files.prefix.contains('*') {
            errors.push(ValidationError::new(&field, "must not contain parameters"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_proxy(field: &str, proxy: &ProxyRouteConfig, errors: &mut Vec<ValidationError>) {
    if proxy.pattern.trim().is_empty() {
        errors.push(ValidationError::new(format!("{field}.pattern"), "must not be empty"));
    }
    for method in &proxy.methods {
        if method.parse::<Method>().is_err() {
            errors.push(ValidationError::new(
                format!("{field}.methods"),
                format!("{method:?} is not an HTTP method"),
            ));
        }
    }
    if proxy.targets.is_empty() {
        errors.push(ValidationError::new(
            format!("{field}.targets"),
            "at least one target is required",
        ));
    }

    let mut names = HashSet::new();
    for (i, target) in proxy.targets.iter().enumerate() {
        let field = format!("{field}.targets[{i}]");
        if !names.insert(target.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate target name {:?}", target.name),
            ));
        }
        match Url::parse(&target.url) {
            Ok(url) if !matches!(url.scheme(), "http" | "ws") => {
                errors.push(ValidationError::new(
                    format!("{field}.url"),
                    format!("unsupported scheme {:?} (http or ws)", url.scheme()),
                ));
            }
            Ok(url) if url.host_str().is_none() => {
                errors.push(ValidationError::new(format!("{field}.url"), "missing host"));
            }
            Ok(_) => {}
            Err(err) => {
                errors.push(ValidationError::new(format!("{field}.url"), err.to_string()));
            }
        }
        if proxy.balancer == BalancerKind::Weighted {
            match target.weight {
                Some(w) if w.is_finite() && w >= 0.0 => {}
                Some(_) => errors.push(ValidationError::new(
                    format!("{field}.weight"),
                    "must be a non-negative number",
                )),
                None => errors.push(ValidationError::new(
                    format!("{field}.weight"),
                    "required by the weighted balancer",
                )),
            }
        }
    }

    for (i, rule) in proxy.rewrite.iter().enumerate() {
        if rule.from.is_empty() {
            errors.push(ValidationError::new(
                format!("{field}.rewrite[{i}].from"),
                "must not be empty",
            ));
        }
    }
}
