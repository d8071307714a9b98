// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{hash::Hash, num::NonZeroUsize};

use lru::LruCache;

/// LRU cache bounded both by item count and by the sum of item weights.
/// Items are evicted least recently used first until both bounds hold.
pub struct WeightedLru<K: Hash + Eq, V> {
    items: LruCache<K, (V, usize)>,
    weight: usize,
    max_weight: usize,
}

impl<K: Hash + Eq, V> WeightedLru<K, V> {
    pub fn new(max_weight: usize, max_items: usize) -> eyre::Result<Self> {
        let max_items = NonZeroUsize::new(max_items)
            .ok_or_else(|| eyre::eyre!("cache must allow at least one item"))?;
        eyre::ensure!(max_weight > 0, "cache weight limit must be positive");
        Ok(Self {
            items: LruCache::new(max_items),
            weight: 0,
            max_weight,
        })
    }

    /// Returns the value and marks it as recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.items.get(key).map(|(value, _)| value)
    }

    /// Inserts or replaces the value. Returns `false` if it alone is heavier
    /// than the whole cache, in which case it is not kept.
    pub fn add(&mut self, key: K, value: V, weight: usize) -> bool {
        if let Some((_, old)) = self.items.pop(&key) {
            self.weight -= old;
        }
        if weight > self.max_weight {
            return false;
        }
        while self.weight + weight > self.max_weight {
            match self.items.pop_lru() {
                Some((_, (_, evicted))) => self.weight -= evicted,
                None => break,
            }
        }
        // Count bound evictions happen inside `push`
        if let Some((_, (_, evicted))) = self.items.push(key, (value, weight)) {
            self.weight -= evicted;
        }
        self.weight += weight;
        true
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, weight) = self.items.pop(key)?;
        self.weight -= weight;
        Some(value)
    }

    pub fn purge(&mut self) {
        self.items.clear();
        self.weight = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn weight(&self) -> usize {
        self.weight
    }
}
