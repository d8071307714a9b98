// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{io, sync::Arc};

mod compact;
mod flushable;
mod memory;
mod rocks;

pub use compact::compact;
pub use flushable::Flushable;
pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// A key and either the new value or `None` for a deletion.
pub type BatchOperation = (Vec<u8>, Option<Vec<u8>>);

/// Point-access key/value store used for all vector tables.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> io::Result<()>;

    fn delete(&self, key: &[u8]) -> io::Result<()>;

    /// Applies all operations. Backends that support it do so atomically.
    fn write_batch(&self, batch: Vec<BatchOperation>) -> io::Result<()> {
        for (key, value) in batch {
            match value {
                Some(value) => self.put(&key, &value)?,
                None => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

/// Namespace inside a store: every key is transparently prefixed.
#[derive(Clone)]
pub struct Table {
    db: Arc<dyn Store>,
    prefix: Vec<u8>,
}

impl Table {
    pub fn new(db: Arc<dyn Store>, prefix: &[u8]) -> Self {
        Self {
            db,
            prefix: prefix.to_vec(),
        }
    }

    fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut prefixed = Vec::with_capacity(self.prefix.len() + key.len());
        prefixed.extend_from_slice(&self.prefix);
        prefixed.extend_from_slice(key);
        prefixed
    }
}

impl Store for Table {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        self.db.get(&self.key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> io::Result<()> {
        self.db.put(&self.key(key), value)
    }

    fn delete(&self, key: &[u8]) -> io::Result<()> {
        self.db.delete(&self.key(key))
    }

    fn write_batch(&self, batch: Vec<BatchOperation>) -> io::Result<()> {
        let batch = batch
            .into_iter()
            .map(|(key, value)| (self.key(&key), value))
            .collect();
        self.db.write_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_do_not_overlap() {
        let db: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let a = Table::new(db.clone(), b"a");
        let b = Table::new(db.clone(), b"b");
        a.put(b"key", b"1").unwrap();
        b.put(b"key", b"2").unwrap();
        assert_eq!(a.get(b"key").unwrap(), Some(b"1".to_vec()));
        assert_eq!(b.get(b"key").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.get(b"akey").unwrap(), Some(b"1".to_vec()));

        a.write_batch(vec![(b"key".to_vec(), None), (b"other".to_vec(), Some(b"3".to_vec()))])
            .unwrap();
        assert_eq!(a.get(b"key").unwrap(), None);
        assert_eq!(db.get(b"aother").unwrap(), Some(b"3".to_vec()));
        assert_eq!(b.get(b"key").unwrap(), Some(b"2".to_vec()));
    }
}
