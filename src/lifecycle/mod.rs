//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     GatewayConfig → Router (middleware, static files, proxies) → Server
//!
//! Signals (signals.rs):
//!     SIGINT/SIGTERM/SIGQUIT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → stop accepting → drain (bounded) → cancel in-flight → exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: routes first, listener last
//! - Shutdown has a deadline; whatever is left is cancelled, not awaited

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_router, run};
