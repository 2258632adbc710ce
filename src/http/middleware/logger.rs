//! Access logging.
//!
//! # Responsibilities
//! - Time the rest of the chain
//! - Emit one structured `info` event per request once the chain unwinds
//!
//! # Design Decisions
//! - Request facts are captured before `next()` because terminal handlers
//!   may take the request out of the Context
//! - Errors recorded on the Context are joined into the `error` field

use std::sync::Arc;
use std::time::Instant;

use axum::http::header;
use futures_util::future::BoxFuture;

use crate::http::context::Context;
use crate::http::handler::{Handler, HandlerRef};
use crate::http::request::X_REQUEST_ID;

/// Access logger middleware.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLogger;

/// Install the access logger.
pub fn logger() -> HandlerRef {
    Arc::new(AccessLogger)
}

/// Facts about the request taken before the chain runs.
#[derive(Debug, Default)]
struct RequestFacts {
    request_id: String,
    remote_ip: String,
    host: String,
    method: String,
    uri: String,
    user_agent: String,
    bytes_in: u64,
}

impl RequestFacts {
    fn capture(ctx: &Context) -> Self {
        let get = |name: header::HeaderName| ctx.header(name).unwrap_or_default().to_string();
        let request = ctx.request();
        Self {
            request_id: get(X_REQUEST_ID),
            remote_ip: ctx.client_ip(),
            host: request
                .uri()
                .host()
                .map(str::to_string)
                .unwrap_or_else(|| get(header::HOST)),
            method: request.method().to_string(),
            uri: request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            user_agent: get(header::USER_AGENT),
            bytes_in: ctx
                .header(header::CONTENT_LENGTH)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}

impl Handler for AccessLogger {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut facts = RequestFacts::capture(ctx);
            let start = Instant::now();

            ctx.next().await;

            let latency = start.elapsed();
            if facts.request_id.is_empty() {
                facts.request_id = ctx
                    .writer()
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
            }
            let error = ctx
                .errors()
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");

            tracing::info!(
                parent: ctx.span(),
                request_id = %facts.request_id,
                remote_ip = %facts.remote_ip,
                host = %facts.host,
                method = %facts.method,
                uri = %facts.uri,
                user_agent = %facts.user_agent,
                status = ctx.status().as_u16(),
                error = %error,
                latency = ?latency,
                bytes_in = facts.bytes_in,
                bytes_out = ctx.response_size() as u64,
                "Request completed"
            );
        })
    }

    fn name(&self) -> &str {
        "access_logger"
    }
}
