//! The handler abstraction every route and middleware implements.
//!
//! # Responsibilities
//! - Define the single narrow `Handler` trait
//! - Provide named adapters: `handler_fn` for closures, `from_service` for
//!   tower services
//!
//! # Design Decisions
//! - Handlers borrow the Context mutably for the duration of their future;
//!   middleware continues the chain with `ctx.next().await`
//! - Chains are `Arc<[HandlerRef]>` so composed chains are shared, never
//!   mutated after registration

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};

use crate::http::context::Context;

/// A unit of request processing.
pub trait Handler: Send + Sync + 'static {
    /// Process the request held by `ctx`.
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()>;

    /// Name used for route introspection and logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handler reference.
pub type HandlerRef = Arc<dyn Handler>;

/// An immutable, composed handler chain.
pub type HandlerChain = Arc<[HandlerRef]>;

/// Closure-backed handler created by [`handler_fn`].
pub struct HandlerFn<F> {
    name: String,
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a handler.
///
/// ```ignore
/// router.get("/ping", [handler_fn(|ctx| Box::pin(async move {
///     ctx.text(StatusCode::OK, "pong");
/// }))]);
/// ```
pub fn handler_fn<F>(f: F) -> HandlerRef
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    named(std::any::type_name::<F>(), f)
}

/// Like [`handler_fn`] with an explicit introspection name.
pub fn named<F>(name: impl Into<String>, f: F) -> HandlerRef
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(HandlerFn {
        name: name.into(),
        f,
    })
}

/// Terminal handler backed by a tower service.
pub struct ServiceHandler<S> {
    name: String,
    service: S,
}

impl<S, B> Handler for ServiceHandler<S>
where
    S: Service<Request<Body>, Response = Response<B>, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<axum::BoxError>,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let request = ctx.take_request();
            let response = match self.service.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            ctx.writer_mut().write_response(response.map(Body::new));
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapt a tower service into a terminal handler.
///
/// The service receives the request (body included) and its response is
/// copied into the Context's writer.
pub fn from_service<S, B>(service: S) -> HandlerRef
where
    S: Service<Request<Body>, Response = Response<B>, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<axum::BoxError>,
{
    Arc::new(ServiceHandler {
        name: std::any::type_name::<S>().to_string(),
        service,
    })
}
