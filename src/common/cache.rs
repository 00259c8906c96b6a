//! In-memory cache for storing key-value pairs.
//!
//! Uses moka's high-performance concurrent cache implementation.

use moka::{ops::compute::Op, sync::Cache};

/// Thread-safe in-memory cache, bounded or unbounded.
///
/// A bounded cache evicts once `capacity` is exceeded. The scheduler's
/// live-runner registry is unbounded: its entries leave only on teardown.
#[derive(Clone)]
pub struct MemCache<K, V> {
    variables: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            variables: Cache::new(capacity as u64),
        }
    }

    /// Allocate a [`MemCache`] that never evicts.
    pub fn unbounded() -> Self {
        Self {
            variables: Cache::builder().build(),
        }
    }

    /// Insert or replace a value.
    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.variables.insert(key, value);
    }

    /// Get a value through key `&K`.
    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.variables.get(key)
    }

    pub fn contains(
        &self,
        key: &K,
    ) -> bool {
        self.variables.contains_key(key)
    }

    /// Remove a value through key `&K`, returning it if present.
    pub fn remove(
        &self,
        key: &K,
    ) -> Option<V> {
        self.variables.remove(key)
    }

    /// Atomically remove the entry for `key` when `pred` holds for its value.
    pub fn remove_if(
        &self,
        key: K,
        pred: impl FnOnce(&V) -> bool,
    ) -> bool {
        let result = self.variables.entry(key).and_compute_with(|entry| match entry {
            Some(entry) if pred(entry.value()) => Op::Remove,
            _ => Op::Nop,
        });
        matches!(result, moka::ops::compute::CompResult::Removed(_))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.variables.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return an iterator over the entries of the cache.
    pub fn iter(&self) -> moka::sync::Iter<'_, K, V> {
        self.variables.iter()
    }
}
