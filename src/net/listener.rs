//! Listener binding.
//!
//! # Responsibilities
//! - Bind the configured TCP address or Unix socket path
//! - Remove a stale socket file before binding, and the live one on close
//!
//! # Design Decisions
//! - Accepting is left to `axum::serve`; this module only produces the
//!   listening socket
//! - A socket file that exists but refuses connections is treated as stale

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid bind address {address:?}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to bind {target}: {source}")]
    Bind {
        target: String,
        source: std::io::Error,
    },

    #[error("Unix sockets are not supported on this platform")]
    Unsupported,
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind whatever `config` asks for. A Unix socket wins over `bind_address`.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        match &config.unix_socket {
            Some(path) => bind_unix(path),
            None => bind_tcp(&config.bind_address).await.map(Listener::Tcp),
        }
    }

    /// Human readable address for logs.
    pub fn describe(&self) -> String {
        match self {
            Listener::Tcp(listener) => listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            #[cfg(unix)]
            Listener::Unix { path, .. } => format!("unix:{}", path.display()),
        }
    }
}

pub async fn bind_tcp(address: &str) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = address.parse().map_err(|source| ListenerError::Address {
        address: address.to_string(),
        source,
    })?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind {
            target: addr.to_string(),
            source,
        })?;

    tracing::info!(
        address = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        "Listener bound"
    );
    Ok(listener)
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<Listener, ListenerError> {
    remove_stale_socket(path);
    let listener = UnixListener::bind(path).map_err(|source| ListenerError::Bind {
        target: path.display().to_string(),
        source,
    })?;
    tracing::info!(path = %path.display(), "Listener bound");
    Ok(Listener::Unix {
        listener,
        path: path.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn bind_unix(_path: &Path) -> Result<Listener, ListenerError> {
    Err(ListenerError::Unsupported)
}

#[cfg(unix)]
fn remove_stale_socket(path: &Path) {
    if !path.exists() {
        return;
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        // Someone is still serving on it; let bind fail loudly.
        return;
    }
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %err, "Failed to remove stale socket");
    }
}

/// Remove the socket file left behind by a Unix listener.
pub fn cleanup_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Socket file removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "Failed to remove socket file"),
    }
}
