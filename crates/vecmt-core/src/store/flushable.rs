// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, io, sync::Arc};

use parking_lot::RwLock;

use super::{BatchOperation, Store};

// Keep the not yet flushed operations in memory
#[derive(Default)]
struct BatchedOperations {
    modified: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    total_size: usize,
}

/// Write buffer over a store. Writes stay in memory until [`Flushable::flush`]
/// and can be rolled back with [`Flushable::drop_not_flushed`]; reads see the
/// buffered writes first.
pub struct Flushable {
    parent: Arc<dyn Store>,
    batch: RwLock<BatchedOperations>,
}

impl Flushable {
    pub fn wrap(parent: Arc<dyn Store>) -> Self {
        Self {
            parent,
            batch: RwLock::new(BatchedOperations::default()),
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        // Quick check with read lock
        if self.batch.read().modified.is_empty() {
            return Ok(());
        }

        let mut batch = self.batch.write();
        let operations: Vec<BatchOperation> = batch
            .modified
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        // The buffer is kept if the write fails, so nothing is lost
        self.parent.write_batch(operations)?;
        *batch = BatchedOperations::default();
        Ok(())
    }

    pub fn drop_not_flushed(&self) {
        *self.batch.write() = BatchedOperations::default();
    }

    pub fn not_flushed_pairs(&self) -> usize {
        self.batch.read().modified.len()
    }

    pub fn not_flushed_size(&self) -> usize {
        self.batch.read().total_size
    }

    fn buffer(&self, key: &[u8], value: Option<Vec<u8>>) {
        let mut batch = self.batch.write();
        batch.total_size += key.len() + value.as_ref().map_or(0, Vec::len);
        batch.modified.insert(key.to_vec(), value);
    }
}

impl Store for Flushable {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        // Check the not flushed operations first
        if let Some(value) = self.batch.read().modified.get(key) {
            return Ok(value.clone());
        }
        self.parent.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> io::Result<()> {
        self.buffer(key, Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> io::Result<()> {
        self.buffer(key, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn writes_are_visible_before_flush() {
        let parent = Arc::new(MemoryStore::new());
        let flushable = Flushable::wrap(parent.clone());
        flushable.put(b"k", b"v").unwrap();
        assert_eq!(flushable.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(parent.get(b"k").unwrap(), None);
        assert_eq!(flushable.not_flushed_pairs(), 1);
        assert_eq!(flushable.not_flushed_size(), 2);

        flushable.flush().unwrap();
        assert_eq!(parent.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(flushable.not_flushed_pairs(), 0);
        assert_eq!(flushable.not_flushed_size(), 0);
    }

    #[test]
    fn drop_not_flushed_rolls_back() {
        let parent = Arc::new(MemoryStore::new());
        parent.put(b"k", b"old").unwrap();
        let flushable = Flushable::wrap(parent.clone());
        flushable.put(b"k", b"new").unwrap();
        flushable.put(b"other", b"x").unwrap();
        flushable.drop_not_flushed();
        assert_eq!(flushable.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(flushable.get(b"other").unwrap(), None);
        assert_eq!(flushable.not_flushed_pairs(), 0);
    }

    #[test]
    fn deletes_are_buffered() {
        let parent = Arc::new(MemoryStore::new());
        parent.put(b"k", b"v").unwrap();
        let flushable = Flushable::wrap(parent.clone());
        flushable.delete(b"k").unwrap();
        assert_eq!(flushable.get(b"k").unwrap(), None);
        assert_eq!(parent.get(b"k").unwrap(), Some(b"v".to_vec()));
        flushable.flush().unwrap();
        assert_eq!(parent.get(b"k").unwrap(), None);
        assert!(parent.is_empty());
    }
}
