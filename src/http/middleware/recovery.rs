//! Panic recovery.
//!
//! Wraps the rest of the chain in `catch_unwind`; a panic becomes a single
//! 500 JSON response and an `error` event carrying the panic message and a
//! backtrace. Nothing about the panic reaches the client except its message.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::context::Context;
use crate::http::handler::{Handler, HandlerRef};
use crate::http::response::DefaultResponseBody;

/// Recovery middleware.
#[derive(Debug, Default, Clone, Copy)]
pub struct Recovery;

/// Install panic recovery.
pub fn recovery() -> HandlerRef {
    Arc::new(Recovery)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

impl Handler for Recovery {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(ctx.next()).catch_unwind().await;
            let Err(payload) = outcome else {
                return;
            };

            let message = panic_message(payload.as_ref());
            let backtrace = Backtrace::force_capture();
            tracing::error!(
                parent: ctx.span(),
                panic = %message,
                path = %ctx.path(),
                backtrace = %backtrace,
                "Handler panicked"
            );
            ctx.abort_with_message(
                StatusCode::INTERNAL_SERVER_ERROR,
                &DefaultResponseBody::new(StatusCode::INTERNAL_SERVER_ERROR, message),
            );
        })
    }

    fn name(&self) -> &str {
        "recovery"
    }
}
