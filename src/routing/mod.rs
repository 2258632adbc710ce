//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (startup):
//!     router.get("/cmd/:tool", handlers)
//!     → router.rs (join group prefix, compose chain)
//!     → pattern.rs (classify: exact / prefix / generic regex)
//!     → matcher.rs (rebuild the method's PathMatcher)
//!     → ArcSwap publish
//!
//! Incoming Request (method, path):
//!     → router.rs (per-method table lookup)
//!     → matcher.rs (exact → prefix → generic, ranked)
//!     → MatchResult { route_index, params } or 404/405 fallback
//! ```
//!
//! # Design Decisions
//! - Tables rebuilt on registration, immutable while serving
//! - Regex scan per request; route counts are small
//! - Deterministic: same input always matches same route
//! - Earliest registration wins a full ranking tie

pub mod matcher;
pub mod pattern;
pub mod router;

pub use matcher::{MatchResult, Param, Params, PathMatcher};
pub use router::{Router, RouterOptions, RouteInfo};
