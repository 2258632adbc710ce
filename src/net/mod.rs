//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerConfig
//!     → listener.rs (TCP address or Unix socket path)
//!     → tls.rs (optional rustls acceptor config)
//!     → http::server hands the socket to axum / axum-server
//! ```
//!
//! # Design Decisions
//! - TLS is only offered on TCP listeners
//! - Unix socket files are cleaned up on both bind and shutdown

pub mod listener;
pub mod tls;

pub use listener::{Listener, ListenerError};
