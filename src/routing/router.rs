//! Route registration and request dispatch.
//!
//! # Responsibilities
//! - Own the per-method route tables and rebuild a table's matcher on
//!   every registration
//! - Compose handler chains: handle middleware ++ route handlers
//! - Maintain the 404/405 fallback chains
//! - Dispatch requests through a pooled Context
//! - Serve static directories
//!
//! # Design Decisions
//! - Tables are published through `ArcSwap`; requests never take a lock
//! - Registration is serialized by a mutex and rebuilds the whole method
//!   table (startup-time cost)
//! - Groups are handles onto the same shared state with their own prefix
//!   and middleware
//! - Explicit 404/405 fallbacks rather than silent default routes

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, Uri};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tower_http::services::ServeDir;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::http::context::Context;
use crate::http::handler::{Handler, HandlerChain, HandlerRef};
use crate::http::pool::Pool;
use crate::http::response::DefaultResponseBody;
use crate::routing::matcher::{MatchResult, PathMatcher};
use crate::routing::pattern::{EXACT_MARKER, PREFIX_MARKER};

/// Methods registered by [`Router::any`].
pub const ANY_METHODS: [Method; 7] = [
    Method::OPTIONS,
    Method::HEAD,
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

/// Router behaviour switches.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Answer 405 when the path matches under another method.
    pub handle_method_not_allowed: bool,
    /// Clean the request path (`//`, `.`, `..`) before matching.
    pub remove_extra_slash: bool,
    /// Upper bound on idle pooled Contexts.
    pub max_idle_contexts: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            handle_method_not_allowed: true,
            remove_extra_slash: false,
            max_idle_contexts: 1024,
        }
    }
}

/// Registered route metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    pub handler_name: String,
}

#[derive(Default)]
struct MethodTable {
    patterns: Vec<String>,
    chains: Vec<HandlerChain>,
    matcher: PathMatcher,
}

impl MethodTable {
    fn find(&self, path: &str) -> Option<(HandlerChain, &str, MatchResult)> {
        let hit = self.matcher.find(path)?;
        let chain = self.chains.get(hit.route_index)?.clone();
        let pattern = self.patterns.get(hit.route_index)?;
        Some((chain, pattern.as_str(), hit))
    }
}

struct Fallbacks {
    not_found: HandlerChain,
    no_method: HandlerChain,
}

#[derive(Default)]
struct FallbackHandlers {
    root_middleware: Vec<HandlerRef>,
    not_found: Vec<HandlerRef>,
    no_method: Vec<HandlerRef>,
}

impl FallbackHandlers {
    fn compose(&self) -> Fallbacks {
        let merge = |tail: &[HandlerRef]| -> HandlerChain {
            self.root_middleware.iter().chain(tail).cloned().collect()
        };
        Fallbacks {
            not_found: merge(&self.not_found),
            no_method: merge(&self.no_method),
        }
    }
}

struct RouterShared {
    tables: ArcSwap<HashMap<Method, Arc<MethodTable>>>,
    registration: Mutex<()>,
    routes: Mutex<Vec<RouteInfo>>,
    fallback_handlers: Mutex<FallbackHandlers>,
    fallbacks: ArcSwap<Fallbacks>,
    options: RouterOptions,
    pool: Arc<Pool<Context>>,
    root_token: CancellationToken,
}

/// Route table handle. Clones and groups share the same tables.
#[derive(Clone)]
pub struct Router {
    shared: Arc<RouterShared>,
    prefix: String,
    middleware: Vec<HandlerRef>,
    is_root: bool,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("middleware", &self.middleware.len())
            .field("routes", &self.shared.routes.lock().len())
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_options(RouterOptions::default())
    }

    pub fn with_options(options: RouterOptions) -> Self {
        let pool = Arc::new(Pool::new(options.max_idle_contexts, Context::new));
        let handlers = FallbackHandlers::default();
        let fallbacks = handlers.compose();
        Self {
            shared: Arc::new(RouterShared {
                tables: ArcSwap::from_pointee(HashMap::new()),
                registration: Mutex::new(()),
                routes: Mutex::new(Vec::new()),
                fallback_handlers: Mutex::new(handlers),
                fallbacks: ArcSwap::from_pointee(fallbacks),
                options,
                pool,
                root_token: CancellationToken::new(),
            }),
            prefix: "/".to_string(),
            middleware: Vec::new(),
            is_root: true,
        }
    }

    /// Router with access logging, panic recovery and request IDs installed.
    pub fn with_default_middleware(options: RouterOptions) -> Self {
        let mut router = Self::with_options(options);
        router.use_middleware([
            crate::middleware::logger(),
            crate::middleware::recovery(),
            crate::middleware::request_id(),
        ]);
        router
    }

    pub fn settings(&self) -> &RouterOptions {
        &self.shared.options
    }

    /// Root token; cancelling it cancels every in-flight request's token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.root_token.clone()
    }

    // ---- registration ----------------------------------------------------

    /// Register `handlers` for `method` and `pattern`.
    pub fn handle<I>(&self, method: Method, pattern: &str, handlers: I) -> &Self
    where
        I: IntoIterator<Item = HandlerRef>,
    {
        let chain: Vec<HandlerRef> = self.compose(handlers);
        self.register(method, self.join(pattern), chain.into());
        self
    }

    fn register(&self, method: Method, pattern: String, chain: HandlerChain) {
        let handler_name = chain
            .last()
            .map(|h| h.name().to_string())
            .unwrap_or_default();

        let _guard = self.shared.registration.lock();
        let current = self.shared.tables.load_full();
        let mut tables: HashMap<Method, Arc<MethodTable>> = (*current).clone();

        let mut patterns = Vec::new();
        let mut chains = Vec::new();
        if let Some(existing) = tables.get(&method) {
            patterns.extend(existing.patterns.iter().cloned());
            chains.extend(existing.chains.iter().cloned());
        }
        patterns.push(pattern.clone());
        chains.push(chain);
        let matcher = PathMatcher::build(&patterns);

        tables.insert(
            method.clone(),
            Arc::new(MethodTable {
                patterns,
                chains,
                matcher,
            }),
        );
        self.shared.tables.store(Arc::new(tables));

        tracing::debug!(method = %method, path = %pattern, handler = %handler_name, "Route registered");
        self.shared.routes.lock().push(RouteInfo {
            method,
            path: pattern,
            handler_name,
        });
    }

    pub fn get<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        self.handle(Method::GET, pattern, handlers)
    }

    pub fn post<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        self.handle(Method::POST, pattern, handlers)
    }

    pub fn put<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        self.handle(Method::PUT, pattern, handlers)
    }

    pub fn delete<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        self.handle(Method::DELETE, pattern, handlers)
    }

    pub fn patch<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        self.handle(Method::PATCH, pattern, handlers)
    }

    pub fn head<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        self.handle(Method::HEAD, pattern, handlers)
    }

    pub fn options<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        self.handle(Method::OPTIONS, pattern, handlers)
    }

    /// Register the same chain for every method in [`ANY_METHODS`].
    pub fn any<I: IntoIterator<Item = HandlerRef>>(&self, pattern: &str, handlers: I) -> &Self {
        let handlers: Vec<HandlerRef> = handlers.into_iter().collect();
        for method in ANY_METHODS {
            self.handle(method, pattern, handlers.iter().cloned());
        }
        self
    }

    /// Append middleware to this handle. Routes registered earlier keep
    /// their chains; on the root router the fallback chains are rebuilt.
    pub fn use_middleware<I>(&mut self, handlers: I) -> &mut Self
    where
        I: IntoIterator<Item = HandlerRef>,
    {
        self.middleware.extend(handlers);
        if self.is_root {
            let mut fallback = self.shared.fallback_handlers.lock();
            fallback.root_middleware = self.middleware.clone();
            self.shared.fallbacks.store(Arc::new(fallback.compose()));
        }
        self
    }

    /// A handle whose routes live under `prefix` and run `handlers` first.
    pub fn group<I>(&self, prefix: &str, handlers: I) -> Router
    where
        I: IntoIterator<Item = HandlerRef>,
    {
        Router {
            shared: Arc::clone(&self.shared),
            prefix: self.join(prefix),
            middleware: self.compose(handlers),
            is_root: false,
        }
    }

    /// Terminal handlers for unmatched paths (after root middleware).
    pub fn not_found<I: IntoIterator<Item = HandlerRef>>(&self, handlers: I) -> &Self {
        let mut fallback = self.shared.fallback_handlers.lock();
        fallback.not_found = handlers.into_iter().collect();
        self.shared.fallbacks.store(Arc::new(fallback.compose()));
        self
    }

    /// Terminal handlers for method mismatches (after root middleware).
    pub fn no_method<I: IntoIterator<Item = HandlerRef>>(&self, handlers: I) -> &Self {
        let mut fallback = self.shared.fallback_handlers.lock();
        fallback.no_method = handlers.into_iter().collect();
        self.shared.fallbacks.store(Arc::new(fallback.compose()));
        self
    }

    /// Serve files below `root` at `prefix/*filepath` for GET and HEAD.
    pub fn serve_files(&self, prefix: &str, root: impl Into<PathBuf>) -> Result<&Self> {
        if prefix.contains(':') || prefix.contains('*') {
            return Err(Error::invalid_route(
                prefix,
                "URL parameters can not be used when serving a static folder",
            ));
        }
        let root = root.into();
        let handler: HandlerRef = Arc::new(StaticFiles {
            service: ServeDir::new(&root),
            root,
        });
        let pattern = format!("{}/*filepath", prefix.trim_end_matches('/'));
        self.get(&pattern, [handler.clone()]);
        self.head(&pattern, [handler]);
        Ok(self)
    }

    /// Every registered route in registration order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.shared.routes.lock().clone()
    }

    fn compose<I: IntoIterator<Item = HandlerRef>>(&self, handlers: I) -> Vec<HandlerRef> {
        self.middleware.iter().cloned().chain(handlers).collect()
    }

    fn join(&self, relative: &str) -> String {
        join_path(&self.prefix, relative)
    }

    // ---- dispatch --------------------------------------------------------

    /// Run one request through the router.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let shared = &self.shared;
        let method = request.method().clone();
        let path = if shared.options.remove_extra_slash {
            clean_path(request.uri().path())
        } else {
            request.uri().path().to_string()
        };

        let span = tracing::info_span!("request", method = %method, path = %path);
        let mut ctx = shared.pool.acquire();
        let token = shared.root_token.child_token();
        ctx.prepare(request, span.clone(), token.clone());
        // Dropped mid-request (client gone): cancel work holding the token.
        let abandoned = token.drop_guard();

        let tables = shared.tables.load_full();
        let found = tables.get(&method).and_then(|t| t.find(&path));

        async {
            if let Some((chain, pattern, hit)) = found {
                ctx.set_route(&chain, hit.params, pattern);
                ctx.next().await;
                return;
            }

            let fallbacks = shared.fallbacks.load_full();
            let other_method_matches = shared.options.handle_method_not_allowed
                && tables
                    .iter()
                    .any(|(m, t)| *m != method && t.matcher.find(&path).is_some());
            if other_method_matches {
                serve_error(&mut ctx, &fallbacks.no_method, StatusCode::METHOD_NOT_ALLOWED).await;
            } else {
                serve_error(&mut ctx, &fallbacks.not_found, StatusCode::NOT_FOUND).await;
            }
        }
        .instrument(span)
        .await;

        abandoned.disarm();
        ctx.writer_mut().take_response()
    }

    /// Wrap the router for `axum::serve`.
    pub fn into_axum(self) -> axum::Router {
        axum::Router::new().fallback_service(self)
    }
}

/// Run a fallback chain with `code` preset; write the default JSON body
/// when no handler wrote one and the status was left alone.
async fn serve_error(ctx: &mut Context, chain: &HandlerChain, code: StatusCode) {
    ctx.set_chain(chain);
    ctx.set_status(code);
    ctx.next().await;
    if ctx.writer().written() {
        return;
    }
    if ctx.status() == code {
        ctx.json(code, &DefaultResponseBody::for_status(code));
    }
}

impl Service<Request<Body>> for Router {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut TaskContext<'_>,
    ) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { Ok(router.dispatch(request).await) })
    }
}

/// File handler installed by [`Router::serve_files`].
struct StaticFiles {
    root: PathBuf,
    service: ServeDir,
}

impl StaticFiles {
    fn resolve(&self, file: &str) -> Option<PathBuf> {
        let relative = Path::new(file.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Request URI handed to `ServeDir`: the still-encoded `filepath`
    /// parameter plus the original query, so the file served is the file
    /// checked.
    fn delegated_uri(raw: &str, uri: &Uri) -> Option<Uri> {
        let path = format!("/{}", raw.trim_start_matches('/'));
        let path_and_query = match uri.query() {
            Some(q) => format!("{path}?{q}"),
            None => path,
        };
        path_and_query.parse().ok()
    }
}

impl Handler for StaticFiles {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let raw = ctx.param("filepath").to_string();
            let Ok(decoded) = percent_decode_str(&raw).decode_utf8() else {
                ctx.abort(StatusCode::NOT_FOUND);
                return;
            };
            let Some(path) = self.resolve(&decoded) else {
                ctx.abort(StatusCode::NOT_FOUND);
                return;
            };
            if tokio::fs::metadata(&path).await.is_err() {
                ctx.abort(StatusCode::NOT_FOUND);
                return;
            }
            let Some(uri) = Self::delegated_uri(&raw, ctx.request().uri()) else {
                ctx.abort(StatusCode::NOT_FOUND);
                return;
            };

            let mut request = ctx.take_request();
            *request.uri_mut() = uri;
            let response = match self.service.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            ctx.writer_mut().write_response(response.map(Body::new));
        })
    }

    fn name(&self) -> &str {
        "static_files"
    }
}

/// Join a relative pattern onto a group prefix, keeping route markers, a
/// leading `^` and a trailing slash.
pub fn join_path(base: &str, relative: &str) -> String {
    let (marker, relative) = if let Some(rest) = relative.strip_prefix(EXACT_MARKER) {
        (EXACT_MARKER, rest)
    } else if let Some(rest) = relative.strip_prefix(PREFIX_MARKER) {
        (PREFIX_MARKER, rest)
    } else {
        ("", relative)
    };
    if relative.is_empty() {
        return format!("{marker}{base}");
    }
    let (caret, relative) = match relative.strip_prefix('^') {
        Some(rest) => ("^", rest),
        None => ("", relative),
    };

    let mut joined = clean_path(&format!("{base}/{relative}"));
    if relative.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    format!("{marker}{caret}{joined}")
}

/// Canonical absolute path: no empty, `.` or `..` segments. A trailing
/// slash survives.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut cleaned = format!("/{}", segments.join("/"));
    if path.ends_with('/') && cleaned.len() > 1 {
        cleaned.push('/');
    }
    cleaned
}
