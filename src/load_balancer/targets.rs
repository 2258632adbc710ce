//! Shared target list behind a read-write lock.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::load_balancer::ProxyTarget;

#[derive(Debug, Default)]
pub struct TargetSet {
    targets: RwLock<Vec<Arc<ProxyTarget>>>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `target` unless its name is already present.
    pub fn add(&self, target: ProxyTarget) -> bool {
        let mut targets = self.targets.write();
        if targets.iter().any(|t| t.name == target.name) {
            return false;
        }
        targets.push(Arc::new(target));
        true
    }

    /// Drop the target called `name`.
    pub fn remove(&self, name: &str) -> bool {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|t| t.name != name);
        targets.len() != before
    }

    /// Read access for a single selection.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ProxyTarget>>> {
        self.targets.read()
    }

    pub fn snapshot(&self) -> Vec<Arc<ProxyTarget>> {
        self.targets.read().clone()
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str) -> ProxyTarget {
        ProxyTarget::new(name, "http://127.0.0.1:1").unwrap()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let set = TargetSet::new();
        assert!(set.add(target("a")));
        assert!(!set.add(target("a")));
        assert!(set.add(target("A")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove_missing_leaves_set_alone() {
        let set = TargetSet::new();
        set.add(target("a"));
        set.add(target("b"));
        assert!(!set.remove("c"));
        let names: Vec<_> = set.snapshot().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(set.remove("a"));
        assert_eq!(set.len(), 1);
    }
}
