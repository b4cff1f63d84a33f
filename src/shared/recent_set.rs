//! Bounded FIFO set. Oldest key is evicted once capacity is reached.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Ring of keys in insertion order plus a membership set.
#[derive(Debug)]
pub struct RecentSet<K> {
    order: VecDeque<K>,
    members: HashSet<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone> RecentSet<K> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` when the key was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if self.members.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicates() {
        let mut set = RecentSet::new(4);
        assert!(set.insert(1));
        assert!(!set.insert(1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn evicts_in_insertion_order() {
        let mut set = RecentSet::new(2);
        set.insert("a");
        set.insert("b");
        set.insert("c");
        assert!(!set.contains(&"a"));
        assert!(set.contains(&"b"));
        assert!(set.contains(&"c"));
        assert_eq!(set.len(), 2);
        // "a" was evicted, so it is new again and pushes out "b".
        assert!(set.insert("a"));
        assert!(!set.contains(&"b"));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut set = RecentSet::new(0);
        assert!(set.insert(1));
        assert!(set.insert(2));
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }
}
