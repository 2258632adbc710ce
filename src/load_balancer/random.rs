//! Uniform random selection.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::load_balancer::{LoadBalancer, ProxyTarget, TargetSet};

/// Seed derived from the wall clock.
pub(crate) fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct Random {
    targets: TargetSet,
    rng: Mutex<StdRng>,
}

impl Default for Random {
    fn default() -> Self {
        Self::with_seed(clock_seed())
    }
}

impl Random {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            targets: TargetSet::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl LoadBalancer for Random {
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
        let index = self.rng.lock().gen_range(0..targets.len());
        Some(targets[index].clone())
    }

    fn targets(&self) -> Vec<Arc<ProxyTarget>> {
        self.targets.snapshot()
    }
}
