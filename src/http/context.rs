//! Per-request context and the middleware chain executor.
//!
//! # Responsibilities
//! - Carry the request, response writer, route params and handler chain
//! - Drive the chain with re-entrant `next()` and abort/skip semantics
//! - Provide a thread-safe value store shared between middleware
//! - Collect informational errors for the access logger
//!
//! # Data Flow
//! ```text
//! Router::dispatch
//!     → pool checkout (Reset)
//!     → prepare(request, chain, params)
//!     → next() ─┬─ handler[0] ── next() ─┬─ handler[1] ...
//!               │                        └─ (returns, post-next code runs)
//!               └─ loop stops when exhausted or aborted
//!     → writer.take_response()
//! ```
//!
//! # Design Decisions
//! - The cursor only moves forward; a handler that returns without calling
//!   `next()` lets the loop continue with the following handler
//! - The first abort wins; later aborts never write a second body

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderName, HeaderValue, Method, Request, StatusCode};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::BoxError;
use crate::http::handler::{HandlerChain, HandlerRef};
use crate::http::pool::Reset;
use crate::http::render::{self, Data, IndentJson, Json, Redirect, Render, Text};
use crate::http::request;
use crate::http::response::{body_allowed_for_status, DefaultResponseBody, ResponseWriter};
use crate::routing::matcher::Params;

/// Body limit used by `read_json`.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

type ValueMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Shared handle to a Context's value store.
///
/// Cloning the handle lets spawned tasks keep reading and writing after the
/// handler that spawned them has returned.
#[derive(Clone, Default)]
pub struct Values(Arc<Mutex<ValueMap>>);

impl Values {
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.0.lock().insert(key.into(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.0.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.0.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear in place, or detach when a spawned task still holds the map.
    fn reset(&mut self) {
        if Arc::strong_count(&self.0) > 1 {
            *self = Values::default();
        } else {
            self.0.lock().clear();
        }
    }
}

impl std::fmt::Debug for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.0.lock();
        f.debug_set().entries(map.keys()).finish()
    }
}

/// Per-request state handed to every handler.
pub struct Context {
    request: Request<Body>,
    writer: ResponseWriter,
    params: Params,
    full_path: String,
    chain: Vec<HandlerRef>,
    index: usize,
    aborted: bool,
    values: Values,
    errors: Vec<BoxError>,
    span: Span,
    cancellation: CancellationToken,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Reset for Context {
    fn reset(&mut self) {
        self.request = Request::default();
        self.writer.reset();
        self.params.clear();
        self.full_path.clear();
        self.chain.clear();
        self.index = 0;
        self.aborted = false;
        self.values.reset();
        self.errors.clear();
        self.span = Span::none();
        self.cancellation = CancellationToken::new();
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            request: Request::default(),
            writer: ResponseWriter::new(),
            params: Params::new(),
            full_path: String::new(),
            chain: Vec::new(),
            index: 0,
            aborted: false,
            values: Values::default(),
            errors: Vec::new(),
            span: Span::none(),
            cancellation: CancellationToken::new(),
        }
    }

    pub(crate) fn prepare(
        &mut self,
        request: Request<Body>,
        span: Span,
        cancellation: CancellationToken,
    ) {
        self.request = request;
        self.span = span;
        self.cancellation = cancellation;
    }

    pub(crate) fn set_route(&mut self, chain: &HandlerChain, params: Params, full_path: &str) {
        self.set_chain(chain);
        self.params = params;
        self.full_path.push_str(full_path);
    }

    pub(crate) fn set_chain(&mut self, chain: &HandlerChain) {
        self.chain.clear();
        self.chain.extend(chain.iter().cloned());
        self.index = 0;
    }

    // ---- chain execution -------------------------------------------------

    /// Run the remaining handlers until the chain is exhausted or aborted.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            while self.index < self.chain.len() && !self.aborted {
                let handler = Arc::clone(&self.chain[self.index]);
                self.index += 1;
                handler.call(self).await;
            }
        })
    }

    /// Stop the chain and set `status`. Only the first abort takes effect.
    pub fn abort(&mut self, status: StatusCode) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        self.writer.set_status(status);
    }

    /// Stop the chain and write `body` as JSON, replacing anything buffered.
    pub fn abort_with_message<T: Serialize + ?Sized>(&mut self, status: StatusCode, body: &T) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        self.writer.clear_body();
        self.render(status, &Json(body));
    }

    /// Abort with a `DefaultResponseBody` carrying the error's message.
    pub fn abort_with_error(&mut self, status: StatusCode, err: impl Into<BoxError>) {
        let err = err.into();
        let body = DefaultResponseBody::new(status, err.to_string());
        self.abort_with_message(status, &body);
    }

    /// Set the abort flag without touching the response.
    pub fn skip(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Name of the final handler in the chain.
    pub fn handler_name(&self) -> &str {
        self.chain.last().map(|h| h.name()).unwrap_or_default()
    }

    // ---- user values and errors -----------------------------------------

    pub fn set_value<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.set(key, value);
    }

    pub fn get_value<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.values.get(key)
    }

    /// A handle to the value store that may outlive this handler.
    pub fn values(&self) -> Values {
        self.values.clone()
    }

    pub fn record_error(&mut self, err: impl Into<BoxError>) {
        self.errors.push(err.into());
    }

    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    // ---- request ---------------------------------------------------------

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    /// Move the request out, leaving its head (without body) in place.
    pub fn take_request(&mut self) -> Request<Body> {
        let (parts, body) = std::mem::take(&mut self.request).into_parts();
        self.request = Request::from_parts(parts.clone(), Body::empty());
        Request::from_parts(parts, body)
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// The registered pattern that matched, empty for fallbacks.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Route parameter by name; empty when absent.
    pub fn param(&self, name: &str) -> &str {
        self.params.by_name(name)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// First query value named `name`, percent-decoded.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.request.uri().query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Like `query`, falling back to `default` when missing or empty.
    pub fn default_query(&self, name: &str, default: &str) -> String {
        self.query(name)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of the cookie `name` from the Cookie header.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim_matches('"').to_string())
    }

    pub fn client_ip(&self) -> String {
        request::client_ip(&self.request)
    }

    pub fn scheme(&self) -> String {
        request::scheme(&self.request)
    }

    pub fn is_websocket(&self) -> bool {
        request::is_websocket(&self.request)
    }

    /// Consume the request body, failing past `limit` bytes.
    pub async fn read_body(&mut self, limit: usize) -> Result<Bytes, BoxError> {
        let body = std::mem::take(self.request.body_mut());
        Ok(axum::body::to_bytes(body, limit).await?)
    }

    /// Consume the body and decode it as JSON.
    pub async fn read_json<T: DeserializeOwned>(&mut self) -> Result<T, BoxError> {
        let bytes = self.read_body(DEFAULT_BODY_LIMIT).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ---- response --------------------------------------------------------

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut ResponseWriter {
        &mut self.writer
    }

    pub fn status(&self) -> StatusCode {
        self.writer.status()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.writer.set_status(status);
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.writer.set_header(name, value);
    }

    pub fn response_size(&self) -> usize {
        self.writer.size()
    }

    /// Write `r` with `status`; the body is dropped for 1xx/204/304.
    pub fn render<R: Render + ?Sized>(&mut self, status: StatusCode, r: &R) {
        self.writer.set_status(status);
        if let Some(content_type) = r.content_type() {
            render::write_content_type(&mut self.writer, content_type);
        }
        if !body_allowed_for_status(status) {
            return;
        }
        if let Err(err) = r.render(&mut self.writer) {
            tracing::warn!(parent: &self.span, error = %err, "Render failed");
            self.writer.clear_body();
            self.writer.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            self.record_error(err);
        }
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) {
        self.render(status, &Json(value));
    }

    pub fn indent_json<T: Serialize + ?Sized>(
        &mut self,
        status: StatusCode,
        value: &T,
        indent: &str,
    ) {
        self.render(status, &IndentJson { data: value, indent });
    }

    pub fn text(&mut self, status: StatusCode, body: &str) {
        self.render(status, &Text(body));
    }

    pub fn data(&mut self, status: StatusCode, content_type: &'static str, bytes: &[u8]) {
        self.render(status, &Data { content_type, bytes });
    }

    pub fn redirect(&mut self, status: StatusCode, location: &str) {
        self.render(status, &Redirect { status, location });
    }

    // ---- ambient ---------------------------------------------------------

    /// Span every log event for this request should attach to.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Fires when the router's root token is cancelled (forced shutdown) or
    /// when the request is dropped before its chain finished (client gone).
    /// A request that completes leaves it live, so spawned work may hold a
    /// clone past the response.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[cfg(test)]
    pub(crate) fn for_test(request: Request<Body>) -> Self {
        let mut ctx = Self::new();
        ctx.request = request;
        ctx
    }

    #[cfg(test)]
    pub(crate) fn with_chain(request: Request<Body>, chain: Vec<HandlerRef>) -> Self {
        let mut ctx = Self::for_test(request);
        ctx.chain = chain;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::named;
    use crate::routing::matcher::Param;

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn trace_handler(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> HandlerRef {
        named(name, move |ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().push(format!("{name}:in"));
                ctx.next().await;
                log.lock().push(format!("{name}:out"));
            })
        })
    }

    #[tokio::test]
    async fn test_next_runs_lifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            trace_handler(log.clone(), "a"),
            trace_handler(log.clone(), "b"),
            trace_handler(log.clone(), "c"),
        ];
        let mut ctx = Context::with_chain(get("/"), chain);
        ctx.next().await;

        assert_eq!(
            *log.lock(),
            ["a:in", "b:in", "c:in", "c:out", "b:out", "a:out"]
        );
    }

    #[tokio::test]
    async fn test_abort_stops_deeper_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let aborter = named("aborter", |ctx| {
            Box::pin(async move {
                ctx.abort(StatusCode::UNAUTHORIZED);
                ctx.next().await;
            })
        });
        let chain = vec![
            trace_handler(log.clone(), "outer"),
            aborter,
            trace_handler(log.clone(), "never"),
        ];
        let mut ctx = Context::with_chain(get("/"), chain);
        ctx.next().await;

        assert_eq!(*log.lock(), ["outer:in", "outer:out"]);
        assert_eq!(ctx.status(), StatusCode::UNAUTHORIZED);
        assert!(ctx.is_aborted());
    }

    #[tokio::test]
    async fn test_handlers_without_next_still_advance() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = log.clone();
        let l2 = log.clone();
        let chain = vec![
            named("first", move |_ctx| {
                let l1 = l1.clone();
                Box::pin(async move { l1.lock().push("first".to_string()) })
            }),
            named("second", move |_ctx| {
                let l2 = l2.clone();
                Box::pin(async move { l2.lock().push("second".to_string()) })
            }),
        ];
        let mut ctx = Context::with_chain(get("/"), chain);
        ctx.next().await;
        ctx.next().await;
        assert_eq!(*log.lock(), ["first", "second"]);
    }

    #[tokio::test]
    async fn test_abort_with_message_is_idempotent() {
        let mut ctx = Context::for_test(get("/"));
        ctx.abort_with_message(
            StatusCode::FORBIDDEN,
            &DefaultResponseBody::for_status(StatusCode::FORBIDDEN),
        );
        ctx.abort_with_message(StatusCode::INTERNAL_SERVER_ERROR, &"second");
        ctx.abort(StatusCode::BAD_REQUEST);

        assert_eq!(ctx.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = serde_json::from_slice(&ctx.writer().buffered()).unwrap();
        assert_eq!(body["code"], 403);
        assert_eq!(body["status"], "error");
    }

    #[test]
    fn test_abort_with_message_replaces_partial_body() {
        let mut ctx = Context::for_test(get("/"));
        ctx.text(StatusCode::OK, "partial");
        ctx.abort_with_message(StatusCode::INTERNAL_SERVER_ERROR, &"boom");
        assert_eq!(&ctx.writer().buffered()[..], b"\"boom\"\n");
    }

    #[test]
    fn test_skip_leaves_response_alone() {
        let mut ctx = Context::for_test(get("/"));
        ctx.set_status(StatusCode::ACCEPTED);
        ctx.skip();
        assert!(ctx.is_aborted());
        assert_eq!(ctx.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_values_roundtrip_and_type_mismatch() {
        let ctx = Context::for_test(get("/"));
        ctx.set_value("user", String::from("gopher"));
        assert_eq!(ctx.get_value::<String>("user").as_deref().map(String::as_str), Some("gopher"));
        assert!(ctx.get_value::<u32>("user").is_none());
        assert!(ctx.get_value::<String>("missing").is_none());
    }

    #[tokio::test]
    async fn test_values_handle_usable_from_spawned_task() {
        let ctx = Context::for_test(get("/"));
        let values = ctx.values();
        tokio::spawn(async move { values.set("done", true) }).await.unwrap();
        assert_eq!(ctx.get_value::<bool>("done").map(|v| *v), Some(true));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = Context::for_test(get("/x?y=1"));
        ctx.params = [Param::new("id", "1")].into_iter().collect();
        ctx.full_path.push_str("/x/:id");
        ctx.chain.push(named("h", |_ctx| Box::pin(async {})));
        ctx.index = 1;
        ctx.abort(StatusCode::NOT_FOUND);
        ctx.set_value("k", 1u8);
        ctx.record_error("oops");
        ctx.text(StatusCode::NOT_FOUND, "body");
        let held = ctx.values();

        ctx.reset();

        assert!(ctx.params().is_empty());
        assert!(ctx.full_path().is_empty());
        assert!(ctx.chain.is_empty());
        assert_eq!(ctx.index, 0);
        assert!(!ctx.is_aborted());
        assert!(ctx.get_value::<u8>("k").is_none());
        assert!(ctx.errors().is_empty());
        assert_eq!(ctx.status(), StatusCode::OK);
        assert_eq!(ctx.response_size(), 0);
        assert_eq!(ctx.path(), "/");
        // The detached handle keeps its data.
        assert!(held.contains("k"));
    }

    #[test]
    fn test_query_helpers() {
        let ctx = Context::for_test(get("/s?q=hello%20world&empty="));
        assert_eq!(ctx.query("q").as_deref(), Some("hello world"));
        assert_eq!(ctx.query("missing"), None);
        assert_eq!(ctx.default_query("empty", "d"), "d");
        assert_eq!(ctx.default_query("q", "d"), "hello world");
    }

    #[test]
    fn test_cookie_lookup() {
        let req = Request::get("/")
            .header("cookie", "a=1; session=\"abc\"")
            .body(Body::empty())
            .unwrap();
        let ctx = Context::for_test(req);
        assert_eq!(ctx.cookie("session").as_deref(), Some("abc"));
        assert_eq!(ctx.cookie("b"), None);
    }

    #[tokio::test]
    async fn test_read_json_and_limit() {
        let req = Request::post("/")
            .body(Body::from(r#"{"name":"gopher"}"#))
            .unwrap();
        let mut ctx = Context::for_test(req);
        let v: serde_json::Value = ctx.read_json().await.unwrap();
        assert_eq!(v["name"], "gopher");

        let req = Request::post("/").body(Body::from("0123456789")).unwrap();
        let mut ctx = Context::for_test(req);
        assert!(ctx.read_body(4).await.is_err());
    }

    #[test]
    fn test_render_suppresses_body_for_not_modified() {
        let mut ctx = Context::for_test(get("/"));
        ctx.json(StatusCode::NOT_MODIFIED, &serde_json::json!({"a": 1}));
        assert_eq!(ctx.status(), StatusCode::NOT_MODIFIED);
        assert!(!ctx.writer().written());
        assert_eq!(ctx.writer().headers()[header::CONTENT_TYPE], render::MIME_JSON);
    }

    #[test]
    fn test_take_request_keeps_head() {
        let mut ctx = Context::for_test(get("/keep?x=1"));
        let taken = ctx.take_request();
        assert_eq!(taken.uri().path(), "/keep");
        assert_eq!(ctx.path(), "/keep");
        assert_eq!(ctx.query("x").as_deref(), Some("1"));
    }
}
