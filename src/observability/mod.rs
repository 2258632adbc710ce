//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Router / middleware / proxy
//!     → per-request span (method, path, request id)
//!     → tracing events (access log, proxy errors, lifecycle)
//!     → logging.rs subscriber (pretty or JSON on stdout)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through the span, not through each event
//! - Subscriber setup lives here so the library never installs one implicitly

pub mod logging;
