//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{LoadBalancer, ProxyTarget, TargetSet};

/// Round-robin selector.
/// The counter only grows; the index is taken modulo the live target count
/// so removals never push it out of range.
#[derive(Debug, Default)]
pub struct RoundRobin {
    targets: TargetSet,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn add(&self, target: ProxyTarget) -> bool {
        self.targets.add(target)
    }

    fn remove(&self, name: &str) -> bool {
        self.targets.remove(name)
    }

    fn next(&self) -> Option<Arc<ProxyTarget>> {
        let targets = self.targets.read();
        if targets.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        Some(targets[index].clone())
    }

    fn targets(&self) -> Vec<Arc<ProxyTarget>> {
        self.targets.snapshot()
    }
}
