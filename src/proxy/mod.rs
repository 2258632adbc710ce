//! Reverse proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Context (terminal handler)
//!     → LoadBalancer::next()            (none → 503)
//!     → ctx value "target" = ProxyTarget
//!     → rewrite.rs (first matching rule, once)
//!     → X-Real-IP / X-Forwarded-Proto (/ X-Forwarded-For for WebSocket)
//!     → Upgrade: websocket ?
//!         yes → websocket.rs (101 relay + two byte pumps)
//!         no  → http.rs (hyper-util client, optional modify_response)
//!     → ProxyError → {code,status,message} abort (499 / 502 / 503 / 500)
//!     → skip the rest of the chain
//! ```
//!
//! # Design Decisions
//! - The proxy is an ordinary handler, so it works as a route terminal and
//!   as root middleware (answering every otherwise unmatched request)
//! - Upstream failures are recorded on the Context; the client only sees
//!   the public message

pub mod http;
pub mod rewrite;
pub mod websocket;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::{BoxError, Result};
use crate::http::context::Context;
use crate::http::handler::{Handler, HandlerRef};
use crate::http::request::{X_FORWARDED_FOR, X_FORWARDED_PROTO, X_REAL_IP};
use crate::http::response::DefaultResponseBody;
use crate::load_balancer::LoadBalancer;

pub use rewrite::RewriteRules;

/// Context key under which the chosen target is stored by default.
pub const DEFAULT_CONTEXT_KEY: &str = "target";

/// Non-standard status for a request whose cancellation token fired before
/// the upstream answered. On a client disconnect nobody reads it; it is
/// what the access log sees when the drain deadline cancels the request.
pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_GATEWAY)
}

/// Upstream HTTP client.
pub type HttpClient = Client<HttpConnector, Body>;

/// Hook run on every upstream response before it is relayed.
pub type ModifyResponse = Arc<
    dyn Fn(Response<Body>) -> BoxFuture<'static, std::result::Result<Response<Body>, BoxError>>
        + Send
        + Sync,
>;

pub fn default_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Errors raised while forwarding one request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no proxy target available")]
    NoTarget,

    #[error("client closed connection")]
    Canceled { target: String },

    #[error("remote {target} unreachable, could not forward")]
    Unreachable {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("websocket upgrade through {target} failed")]
    Upgrade {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("response from {target} rejected")]
    ModifyResponse {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("rewritten URI is invalid")]
    Rewrite(#[source] axum::http::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoTarget => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Canceled { .. } => client_closed_request(),
            ProxyError::Unreachable { .. }
            | ProxyError::Upgrade { .. }
            | ProxyError::ModifyResponse { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidTarget { .. } | ProxyError::Rewrite(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Proxy settings.
#[derive(Clone)]
pub struct ProxyConfig {
    pub load_balancer: Arc<dyn LoadBalancer>,
    /// Ordered `(from, to)` glob rules.
    pub rewrite: Vec<(String, String)>,
    pub modify_response: Option<ModifyResponse>,
    pub context_key: String,
    pub client: Option<HttpClient>,
}

impl ProxyConfig {
    pub fn new(load_balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            load_balancer,
            rewrite: Vec::new(),
            modify_response: None,
            context_key: DEFAULT_CONTEXT_KEY.to_string(),
            client: None,
        }
    }

    pub fn rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rewrite.push((from.into(), to.into()));
        self
    }

    pub fn modify_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(Response<Body>) -> BoxFuture<'static, std::result::Result<Response<Body>, BoxError>>
            + Send
            + Sync
            + 'static,
    {
        self.modify_response = Some(Arc::new(hook));
        self
    }

    pub fn context_key(mut self, key: impl Into<String>) -> Self {
        self.context_key = key.into();
        self
    }

    pub fn client(mut self, client: HttpClient) -> Self {
        self.client = Some(client);
        self
    }
}

/// Reverse proxy handler.
pub struct Proxy {
    load_balancer: Arc<dyn LoadBalancer>,
    rewrite: RewriteRules,
    modify_response: Option<ModifyResponse>,
    context_key: String,
    client: HttpClient,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("load_balancer", &self.load_balancer)
            .field("rewrite", &self.rewrite.len())
            .field("context_key", &self.context_key)
            .finish()
    }
}

impl Proxy {
    /// Compile `config`; fails on a bad rewrite rule.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Ok(Self {
            load_balancer: config.load_balancer,
            rewrite: RewriteRules::compile(config.rewrite)?,
            modify_response: config.modify_response,
            context_key: config.context_key,
            client: config.client.unwrap_or_else(default_client),
        })
    }

    /// Apply the rewrite rules and forwarding headers to the request head.
    fn prepare(&self, ctx: &mut Context) -> std::result::Result<(), ProxyError> {
        let rewritten = self
            .rewrite
            .rewrite_uri(ctx.request().uri())
            .map_err(ProxyError::Rewrite)?;
        if let Some(uri) = rewritten {
            tracing::debug!(parent: ctx.span(), from = %ctx.request().uri(), to = %uri, "Rewrote request URI");
            *ctx.request_mut().uri_mut() = uri;
        }

        let client_ip = ctx.client_ip();
        let scheme = ctx.scheme();
        let websocket = ctx.is_websocket();
        let headers = ctx.request_mut().headers_mut();
        let mut set_if_absent = |name: HeaderName, value: &str| {
            if headers.contains_key(&name) || value.is_empty() {
                return;
            }
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        };
        set_if_absent(X_REAL_IP, &client_ip);
        set_if_absent(X_FORWARDED_PROTO, &scheme);
        if websocket {
            set_if_absent(X_FORWARDED_FOR, &client_ip);
        }
        Ok(())
    }

    async fn forward(&self, ctx: &mut Context) -> std::result::Result<(), ProxyError> {
        let target = self.load_balancer.next().ok_or(ProxyError::NoTarget)?;
        ctx.set_value(self.context_key.clone(), (*target).clone());
        self.prepare(ctx)?;

        if ctx.is_websocket() {
            websocket::tunnel(ctx, &target).await
        } else {
            http::forward(ctx, &target, &self.client, self.modify_response.as_ref()).await
        }
    }
}

impl Handler for Proxy {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(err) = self.forward(ctx).await {
                match &err {
                    ProxyError::Canceled { .. } => {
                        tracing::debug!(parent: ctx.span(), error = %err, "Proxied request canceled")
                    }
                    _ => tracing::warn!(
                        parent: ctx.span(),
                        error = %err,
                        source = ?std::error::Error::source(&err),
                        "Proxy failed"
                    ),
                }
                let status = err.status();
                let body = DefaultResponseBody::new(status, err.to_string()).with_internal(err);
                ctx.abort_with_message(status, &body);
                ctx.record_error(body);
            }
            ctx.skip();
        })
    }

    fn name(&self) -> &str {
        "proxy"
    }
}

/// Proxy every request through `load_balancer`.
pub fn proxy(load_balancer: Arc<dyn LoadBalancer>) -> HandlerRef {
    Arc::new(Proxy {
        load_balancer,
        rewrite: RewriteRules::default(),
        modify_response: None,
        context_key: DEFAULT_CONTEXT_KEY.to_string(),
        client: default_client(),
    })
}

/// Proxy with rewrite rules, a response hook or a custom client.
pub fn proxy_with_config(config: ProxyConfig) -> Result<HandlerRef> {
    Ok(Arc::new(Proxy::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{ProxyTarget, RoundRobin};
    use crate::routing::Router;
    use axum::http::Request;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::NoTarget.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ProxyError::Canceled { target: "a".into() }.status().as_u16(),
            499
        );
        let unreachable = ProxyError::Unreachable {
            target: "a".into(),
            source: "connection refused".into(),
        };
        assert_eq!(unreachable.status(), StatusCode::BAD_GATEWAY);
        assert!(!unreachable.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn test_no_target_is_503() {
        let router = Router::new();
        router.get("/", [proxy(Arc::new(RoundRobin::new()))]);
        let res = router.dispatch(Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_502_and_recorded() {
        // bind then drop to get a port with nothing listening
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let lb = Arc::new(RoundRobin::new());
        lb.add(ProxyTarget::new("dead", &format!("http://127.0.0.1:{port}")).unwrap());

        let router = Router::new();
        router.get("/x", [
            named_recorder(),
            proxy(lb),
        ]);
        let res = router.dispatch(Request::get("/x").body(Body::empty()).unwrap()).await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(res.headers()["x-errors"], "1");
        assert_eq!(res.headers()["x-target"], "dead");
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], 502);
        assert_eq!(body["status"], "error");
    }

    /// Middleware reporting what the proxy left on the Context.
    fn named_recorder() -> HandlerRef {
        crate::http::handler::named("recorder", |ctx| {
            Box::pin(async move {
                ctx.next().await;
                let errors = ctx.errors().len().to_string();
                let target = ctx
                    .get_value::<ProxyTarget>(DEFAULT_CONTEXT_KEY)
                    .map(|t| t.name.clone())
                    .unwrap_or_default();
                ctx.set_header(
                    HeaderName::from_static("x-errors"),
                    HeaderValue::from_str(&errors).unwrap(),
                );
                ctx.set_header(
                    HeaderName::from_static("x-target"),
                    HeaderValue::from_str(&target).unwrap(),
                );
            })
        })
    }
}
