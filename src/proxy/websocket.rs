//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Replay the client's upgrade request to the target over a fresh TCP
//!   connection
//! - Relay the target's `101 Switching Protocols` to the client
//! - Splice both upgraded connections until either side finishes
//!
//! # Data Flow
//! ```text
//! Client ── upgrade req ──→ Proxy ── same req over TCP ──→ Backend
//! Client ←── 101 + headers ── Proxy ←────── 101 ────────── Backend
//! Client ←────── bytes ──────→ pumps ←────── bytes ──────→ Backend
//! ```
//!
//! # Design Decisions
//! - Byte-level relay; frames are never parsed
//! - Two pump tasks report into a 2-slot channel; the first report tears
//!   both connections down
//! - The splice task outlives the handler; it stops early only when the
//!   request's cancellation token fires (forced shutdown)

use std::io;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::http::context::Context;
use crate::load_balancer::ProxyTarget;
use crate::proxy::http::upstream_uri;
use crate::proxy::ProxyError;

/// Which pump finished first and how.
#[derive(Debug)]
pub struct SpliceOutcome {
    pub client_to_backend: bool,
    pub result: io::Result<u64>,
}

/// Copy bytes both ways between `client` and `backend` until one direction
/// ends, then close both. Returns the first direction to finish, or None
/// when `cancel` fired first.
pub async fn splice<C, B>(client: C, backend: B, cancel: CancellationToken) -> Option<SpliceOutcome>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);
    let (done_tx, mut done_rx) = mpsc::channel::<SpliceOutcome>(2);

    let up_tx = done_tx.clone();
    let up = tokio::spawn(async move {
        let result = tokio::io::copy(&mut client_read, &mut backend_write).await;
        let _ = backend_write.shutdown().await;
        let _ = up_tx
            .send(SpliceOutcome {
                client_to_backend: true,
                result,
            })
            .await;
    });
    let down = tokio::spawn(async move {
        let result = tokio::io::copy(&mut backend_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        let _ = done_tx
            .send(SpliceOutcome {
                client_to_backend: false,
                result,
            })
            .await;
    });

    let first = tokio::select! {
        outcome = done_rx.recv() => outcome,
        _ = cancel.cancelled() => None,
    };

    up.abort();
    down.abort();
    let _ = up.await;
    let _ = down.await;
    // both senders are gone once the pumps are joined
    while done_rx.recv().await.is_some() {}
    first
}

fn upgrade_failed(target: &ProxyTarget, source: impl Into<crate::error::BoxError>) -> ProxyError {
    ProxyError::Upgrade {
        target: target.to_string(),
        source: source.into(),
    }
}

/// Tunnel the Context's upgrade request to `target`.
pub(crate) async fn tunnel(ctx: &mut Context, target: &ProxyTarget) -> Result<(), ProxyError> {
    let mut request = ctx.take_request();
    let client_upgrade = request.extensions_mut().remove::<OnUpgrade>();

    let upstream = upstream_uri(&target.url, request.uri())?;
    let authority = upstream
        .authority()
        .map(|a| {
            let port = a.port_u16().unwrap_or(match upstream.scheme_str() {
                Some("https") => 443,
                _ => 80,
            });
            format!("{}:{port}", a.host())
        })
        .ok_or_else(|| ProxyError::InvalidTarget {
            target: target.to_string(),
            reason: "missing host".to_string(),
        })?;

    let stream = TcpStream::connect(&authority)
        .await
        .map_err(|err| ProxyError::Unreachable {
            target: target.to_string(),
            source: err.into(),
        })?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|err| ProxyError::Unreachable {
            target: target.to_string(),
            source: err.into(),
        })?;
    tokio::spawn(async move {
        if let Err(err) = connection.with_upgrades().await {
            tracing::debug!(error = %err, "Upstream websocket connection ended");
        }
    });

    let (mut parts, _) = request.into_parts();
    parts.uri = upstream
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse()
        .map_err(|err| upgrade_failed(target, err))?;
    parts.version = axum::http::Version::HTTP_11;
    let outbound = Request::from_parts(parts, Body::empty());

    let mut response = sender
        .send_request(outbound)
        .await
        .map_err(|err| ProxyError::Unreachable {
            target: target.to_string(),
            source: err.into(),
        })?;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::debug!(
            parent: ctx.span(),
            target = %target.name,
            status = response.status().as_u16(),
            "Upstream refused websocket upgrade"
        );
        ctx.writer_mut().write_response(response.map(Body::new));
        return Ok(());
    }

    let Some(client_upgrade) = client_upgrade else {
        return Err(upgrade_failed(target, "connection does not support upgrades"));
    };
    let backend_upgrade = hyper::upgrade::on(&mut response);

    let (head, _) = response.into_parts();
    let mut relay = Response::new(Body::empty());
    *relay.status_mut() = head.status;
    *relay.headers_mut() = head.headers;
    ctx.writer_mut().write_response(relay);

    let cancel = ctx.cancellation().clone();
    let name = target.name.clone();
    tokio::spawn(
        async move {
            let (client, backend) = match tokio::try_join!(client_upgrade, backend_upgrade) {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(target = %name, error = %err, "Websocket upgrade failed");
                    return;
                }
            };
            match splice(TokioIo::new(client), TokioIo::new(backend), cancel).await {
                Some(SpliceOutcome { result: Err(err), client_to_backend }) => {
                    tracing::warn!(target = %name, client_to_backend, error = %err, "Websocket relay failed");
                }
                Some(SpliceOutcome { result: Ok(bytes), client_to_backend }) => {
                    tracing::debug!(target = %name, client_to_backend, bytes, "Websocket relay closed");
                }
                None => tracing::debug!(target = %name, "Websocket relay canceled"),
            }
        }
        .instrument(ctx.span().clone()),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_splice_moves_bytes_both_ways() {
        let (client, mut client_peer) = tokio::io::duplex(64);
        let (backend, mut backend_peer) = tokio::io::duplex(64);
        let task = tokio::spawn(splice(client, backend, CancellationToken::new()));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        backend_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        backend_peer.write_all(b"pong").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_peer);
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.client_to_backend);
        assert_eq!(outcome.result.unwrap(), 4);

        // the backend side sees EOF once the relay tears down
        let mut rest = Vec::new();
        backend_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_splice_stops_on_cancel() {
        let (client, _client_peer) = tokio::io::duplex(64);
        let (backend, _backend_peer) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(splice(client, backend, cancel.clone()));
        cancel.cancel();
        assert!(task.await.unwrap().is_none());
    }
}
