//! Free-list pool for per-request objects.
//!
//! # Responsibilities
//! - Hand out reusable objects exclusively to one request at a time
//! - Reset every object on checkout
//! - Return objects automatically when the guard drops
//!
//! # Design Decisions
//! - Reset runs on checkout, not on return, so an object dropped mid-request
//!   (panic, cancelled future) can never leak state into the next user
//! - Any field added to a pooled type must be cleared by its `Reset` impl;
//!   a forgotten field is a correctness bug, not a performance one
//! - The free list is capped; surplus objects are simply dropped

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Objects that can be restored to a pristine state.
pub trait Reset {
    fn reset(&mut self);
}

/// A bounded pool of boxed `T`.
pub struct Pool<T> {
    free: Mutex<Vec<Box<T>>>,
    max_idle: usize,
    make: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Reset> Pool<T> {
    pub fn new(max_idle: usize, make: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
            make: Box::new(make),
        }
    }

    /// Check out an object, reset and exclusively owned by the guard.
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let recycled = self.free.lock().pop();
        let mut item = recycled.unwrap_or_else(|| Box::new((self.make)()));
        item.reset();
        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    /// Number of idle objects waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn release(&self, item: Box<T>) {
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(item);
        }
    }
}

/// Guard returned by [`Pool::acquire`].
pub struct Pooled<T: Reset> {
    item: Option<Box<T>>,
    pool: Arc<Pool<T>>,
}

impl<T: Reset> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the item.
        self.item.as_deref().expect("pooled item present until drop")
    }
}

impl<T: Reset> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_deref_mut().expect("pooled item present until drop")
    }
}

impl<T: Reset> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        data: Vec<u32>,
        resets: usize,
    }

    impl Reset for Scratch {
        fn reset(&mut self) {
            self.data.clear();
            self.resets += 1;
        }
    }

    #[test]
    fn test_reuse_and_reset() {
        let pool = Arc::new(Pool::new(4, Scratch::default));
        {
            let mut a = pool.acquire();
            a.data.push(7);
        }
        assert_eq!(pool.idle(), 1);

        let b = pool.acquire();
        assert!(b.data.is_empty());
        assert_eq!(b.resets, 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_exclusive_checkout() {
        let pool = Arc::new(Pool::new(4, Scratch::default));
        let mut a = pool.acquire();
        let b = pool.acquire();
        a.data.push(1);
        assert!(b.data.is_empty());
    }

    #[test]
    fn test_max_idle_caps_free_list() {
        let pool = Arc::new(Pool::new(1, Scratch::default));
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
