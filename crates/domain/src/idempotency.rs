//! Bounded, insertion-ordered set of seen keys.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Remembers the last `capacity` distinct keys.
///
/// Eviction is strict FIFO on insertion; `has` does not refresh recency.
#[derive(Debug, Clone)]
pub struct IdempotencyCache<K = String> {
    seen: HashSet<K>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K> IdempotencyCache<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    /// Insert `key` if absent. Returns `true` when the key was new.
    pub fn add(&mut self, key: K) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
