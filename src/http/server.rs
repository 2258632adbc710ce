//! HTTP server setup and graceful shutdown.
//!
//! # Responsibilities
//! - Serve a [`Router`] on a TCP, TLS or Unix listener
//! - Stop accepting on shutdown and drain in-flight requests
//! - Cancel whatever is still running once the drain deadline passes
//!
//! # Data Flow
//! ```text
//! Shutdown::trigger()
//!     → listener stops accepting
//!     → in-flight requests finish        (≤ shutdown_timeout)
//!     → router cancellation token fires  (proxies abort with 499,
//!                                         websocket tunnels close)
//!     → run() returns
//! ```
//!
//! # Design Decisions
//! - Plain TCP and Unix sockets go through `axum::serve`; TLS goes through
//!   `axum-server`, which owns the handshake
//! - TLS requests carry a `TlsConnection` extension so `Context::scheme`
//!   reports https without trusting headers

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::http::request::TlsConnection;
use crate::lifecycle::Shutdown;
use crate::net::{listener, tls, Listener};
use crate::routing::Router;

/// Grace period for handlers to observe cancellation after the drain deadline.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// HTTP server for a [`Router`].
#[derive(Debug)]
pub struct Server {
    router: Router,
    config: ListenerConfig,
}

impl Server {
    pub fn new(router: Router, config: ListenerConfig) -> Self {
        Self { router, config }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shutdown_timeout_secs)
    }

    /// Bind per config and serve until `shutdown` fires.
    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        if let Some(tls_config) = &self.config.tls {
            let rustls = tls::load_tls_config(tls_config)
                .await
                .map_err(|err| Error::Tls(err.to_string()))?;
            let addr = self.config.bind_address.parse::<SocketAddr>().map_err(|source| {
                crate::net::ListenerError::Address {
                    address: self.config.bind_address.clone(),
                    source,
                }
            })?;
            return self.serve_tls(addr, rustls, shutdown).await;
        }

        match Listener::bind(&self.config).await? {
            Listener::Tcp(tcp) => self.serve(tcp, shutdown).await,
            #[cfg(unix)]
            Listener::Unix { listener: unix, path } => {
                tracing::info!(path = %path.display(), "HTTP server starting");
                let token = self.router.cancellation_token();
                let timeout = self.drain_timeout();
                let app = self.router.into_axum().into_make_service();
                let signal = {
                    let shutdown = shutdown.clone();
                    async move { shutdown.wait().await }
                };
                let server = axum::serve(unix, app).with_graceful_shutdown(signal);
                let result = drain(server.into_future(), shutdown, timeout, token).await;
                listener::cleanup_socket(&path);
                tracing::info!("HTTP server stopped");
                result.map_err(Error::from)
            }
        }
    }

    /// Serve on an already bound TCP listener until `shutdown` fires.
    pub async fn serve(self, tcp: TcpListener, shutdown: Shutdown) -> Result<()> {
        let addr = tcp.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let token = self.router.cancellation_token();
        let timeout = self.drain_timeout();
        let app = self
            .router
            .into_axum()
            .into_make_service_with_connect_info::<SocketAddr>();
        let signal = {
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        };
        let server = axum::serve(tcp, app).with_graceful_shutdown(signal);
        drain(server.into_future(), shutdown, timeout, token).await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn serve_tls(
        self,
        addr: SocketAddr,
        rustls: RustlsConfig,
        shutdown: Shutdown,
    ) -> Result<()> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let token = self.router.cancellation_token();
        let timeout = self.drain_timeout();
        let handle = axum_server::Handle::new();
        let watcher = {
            let handle = handle.clone();
            let token = token.clone();
            tokio::spawn(async move {
                shutdown.wait().await;
                handle.graceful_shutdown(Some(timeout));
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        let app = self
            .router
            .into_axum()
            .layer(axum::Extension(TlsConnection))
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app)
            .await;

        token.cancel();
        watcher.abort();
        tracing::info!("HTTPS server stopped");
        result.map_err(Error::from)
    }
}

/// Drive `server` until it exits, bounding the post-shutdown drain by `timeout`.
async fn drain<F>(
    server: F,
    shutdown: Shutdown,
    timeout: Duration,
    token: CancellationToken,
) -> std::io::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let mut server = std::pin::pin!(server);
    tokio::select! {
        result = &mut server => {
            token.cancel();
            return result;
        }
        _ = shutdown.wait() => {}
    }

    tracing::info!(timeout_secs = timeout.as_secs(), "Draining in-flight requests");
    let result = match tokio::time::timeout(timeout, &mut server).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Drain deadline passed, cancelling in-flight requests");
            token.cancel();
            match tokio::time::timeout(CANCEL_GRACE, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Requests ignored cancellation, dropping connections");
                    Ok(())
                }
            }
        }
    };
    token.cancel();
    result
}
