//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy handler
//!     → LoadBalancer::next()
//!         - random.rs (uniform draw)
//!         - round_robin.rs (atomic counter modulo live length)
//!         - weighted.rs (cumulative-weight draw)
//!     → targets.rs (read lock over the current TargetSet)
//!     → Arc<ProxyTarget> or None (proxy answers 503)
//! ```
//!
//! # Design Decisions
//! - Targets are never mutated in place; add appends, remove filters by name
//! - `next()` takes a read lock, `add`/`remove` take the write lock
//! - Rejections (duplicate name, missing weight) are `false`, not errors

pub mod random;
pub mod round_robin;
pub mod targets;
pub mod weighted;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

pub use random::Random;
pub use round_robin::RoundRobin;
pub use targets::TargetSet;
pub use weighted::Weighted;

/// A backend the proxy may forward to.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyTarget {
    /// Unique within a balancer; compared case-sensitively.
    pub name: String,
    pub url: Url,
    /// Only meaningful to weighted balancers.
    pub weight: Option<f64>,
}

impl ProxyTarget {
    pub fn new(name: impl Into<String>, url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            name: name.into(),
            url: Url::parse(url)?,
            weight: None,
        })
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Picks one target per request from a managed set.
pub trait LoadBalancer: Send + Sync + fmt::Debug + 'static {
    /// Append `target`; false if the name is taken or the target is unusable
    /// for this strategy.
    fn add(&self, target: ProxyTarget) -> bool;

    /// Remove the target called `name`; false if absent.
    fn remove(&self, name: &str) -> bool;

    /// Next target, or None when the set is empty.
    fn next(&self) -> Option<Arc<ProxyTarget>>;

    /// Snapshot of the current targets in insertion order.
    fn targets(&self) -> Vec<Arc<ProxyTarget>>;
}

/// Balancer strategy, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    Random,
    #[default]
    RoundRobin,
    Weighted,
}

impl BalancerKind {
    /// Build an empty balancer of this kind.
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            BalancerKind::Random => Arc::new(Random::new()),
            BalancerKind::RoundRobin => Arc::new(RoundRobin::new()),
            BalancerKind::Weighted => Arc::new(Weighted::new()),
        }
    }

    /// Build a balancer holding `targets`; returns the names that were
    /// rejected.
    pub fn build_with(
        self,
        targets: impl IntoIterator<Item = ProxyTarget>,
    ) -> (Arc<dyn LoadBalancer>, Vec<String>) {
        let lb = self.build();
        let rejected = targets
            .into_iter()
            .filter_map(|t| {
                let name = t.name.clone();
                (!lb.add(t)).then_some(name)
            })
            .collect();
        (lb, rejected)
    }
}

impl fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BalancerKind::Random => "random",
            BalancerKind::RoundRobin => "round_robin",
            BalancerKind::Weighted => "weighted",
        })
    }
}
