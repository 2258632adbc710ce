//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS/Unix connection
//!     → server.rs (axum::serve / axum-server, graceful shutdown)
//!     → Router (tower Service, routing/router.rs)
//!     → pool.rs (Context checkout + reset)
//!     → context.rs (chain executor: handler.rs implementations)
//!     → response.rs / render.rs (buffered or streaming body)
//!     → Send to client
//! ```

pub mod context;
pub mod handler;
pub mod middleware;
pub mod pool;
pub mod render;
pub mod request;
pub mod response;
pub mod server;

pub use context::{Context, Values};
pub use handler::{from_service, handler_fn, named, Handler, HandlerChain, HandlerRef};
pub use request::{TlsConnection, X_REQUEST_ID};
pub use response::{DefaultResponseBody, ResponseWriter};
pub use server::Server;
