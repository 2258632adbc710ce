//! Request ID propagation.
//!
//! Reuses an inbound `X-Request-ID` or generates a UUID v4, then sets it on
//! both the request (for downstream handlers and proxied backends) and the
//! response.

use std::sync::Arc;

use axum::http::HeaderValue;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::http::context::Context;
use crate::http::handler::{Handler, HandlerRef};
use crate::http::request::X_REQUEST_ID;

/// Generator for fresh request IDs.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Request ID middleware.
#[derive(Clone)]
pub struct RequestId {
    generator: IdGenerator,
}

impl Default for RequestId {
    fn default() -> Self {
        Self {
            generator: Arc::new(|| Uuid::new_v4().simple().to_string()),
        }
    }
}

impl RequestId {
    pub fn with_generator(generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            generator: Arc::new(generator),
        }
    }
}

/// Install request ID propagation with UUID v4 IDs.
pub fn request_id() -> HandlerRef {
    Arc::new(RequestId::default())
}

/// Request ID stored on the request by this middleware, if any.
pub fn current_request_id(ctx: &Context) -> Option<&str> {
    ctx.header(X_REQUEST_ID)
}

impl Handler for RequestId {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let inbound = ctx
                .header(X_REQUEST_ID)
                .filter(|v| !v.is_empty())
                .and_then(|v| HeaderValue::from_str(v).ok());
            let id = match inbound {
                Some(id) => id,
                None => match HeaderValue::from_str(&(self.generator)()) {
                    Ok(id) => id,
                    Err(err) => {
                        tracing::warn!(parent: ctx.span(), error = %err, "Generated request id is not a valid header");
                        ctx.next().await;
                        return;
                    }
                },
            };

            ctx.request_mut().headers_mut().insert(X_REQUEST_ID, id.clone());
            ctx.set_header(X_REQUEST_ID, id);
            ctx.next().await;
        })
    }

    fn name(&self) -> &str {
        "request_id"
    }
}
