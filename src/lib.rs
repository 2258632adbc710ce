//! HTTP routing and middleware framework with a load-balancing reverse proxy.
//!
//! ```text
//! Router::dispatch
//!     → routing (exact / prefix-priority / generic matcher)
//!     → http::Context (pooled, chain cursor, values, errors)
//!     → middleware (logger, recovery, request_id, auth, permission)
//!     → handler or proxy (load_balancer → http forward / ws tunnel)
//! ```

// Core subsystems
pub mod error;
pub mod http;
pub mod routing;

// Traffic management
pub mod load_balancer;
pub mod proxy;

// Runtime
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use error::{BoxError, Error, Result};
pub use http::middleware;
pub use http::{handler_fn, named, Context, Handler, HandlerRef, Server};
pub use lifecycle::Shutdown;
pub use load_balancer::{BalancerKind, LoadBalancer, ProxyTarget};
pub use proxy::{proxy, proxy_with_config, Proxy, ProxyConfig};
pub use routing::{Router, RouterOptions};
