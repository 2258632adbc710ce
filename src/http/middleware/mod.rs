//! Built-in middleware.
//!
//! Every middleware is a [`Handler`](crate::http::Handler) that does its
//! "before" work, calls `ctx.next().await`, then its "after" work.
//!
//! # Data Flow
//! ```text
//! Router::with_default_middleware:
//!     logger → recovery → request_id → [group middleware] → route handlers
//!
//! Opt-in:
//!     auth (401 + WWW-Authenticate) → permission (403) → handlers
//! ```

pub mod auth;
pub mod logger;
pub mod permission;
pub mod recovery;
pub mod request_id;

pub use auth::{
    auth, claims, Auth, AuthError, AuthOptions, Claims, StaticTokenVerifier, TokenVerifier,
    AUTH_KEY,
};
pub use logger::{logger, AccessLogger};
pub use permission::{permission, Permission};
pub use recovery::{recovery, Recovery};
pub use request_id::{request_id, RequestId};
