// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{io, path::Path, sync::Arc};

use rocksdb::{ColumnFamilyDescriptor, Options, ReadOptions, WriteOptions, DB};

use super::{BatchOperation, Store};

// All vector tables share one column family, tables are separated by key prefix
const CF_VECTORS: &str = "vectors";

fn to_io_error(e: rocksdb::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    fn get_read_opts() -> ReadOptions {
        ReadOptions::default()
    }

    fn get_write_opts() -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false); // Async writes for better performance
        write_opts
    }

    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_max_background_jobs(4);
        opts.set_bytes_per_sync(8 * 1048576);
        opts.set_level_compaction_dynamic_level_bytes(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Vectors are only ever read by key
        opts.optimize_for_point_lookup(256);

        let mut cf_opts = Options::default();
        cf_opts.set_target_file_size_base(64 * 1024 * 1024);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(CF_VECTORS, cf_opts)];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors).map_err(to_io_error)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self) -> io::Result<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(CF_VECTORS)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Column family not found"))
    }

    /// Compacts keys in `[start, end)`; `None` means unbounded on that side.
    pub fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> io::Result<()> {
        let cf = self.cf()?;
        self.db.compact_range_cf(&cf, start, end);
        Ok(())
    }

    /// The smallest key starting with `prefix`.
    pub fn first_key_with_prefix(&self, prefix: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let cf = self.cf()?;
        let mut iter = self.db.raw_iterator_cf_opt(&cf, Self::get_read_opts());
        iter.seek(prefix);
        let key = match iter.key() {
            Some(key) if key.starts_with(prefix) => Some(key.to_vec()),
            _ => None,
        };
        iter.status().map_err(to_io_error)?;
        Ok(key)
    }

    /// The greatest key starting with `prefix`.
    pub fn last_key_with_prefix(&self, prefix: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let cf = self.cf()?;
        let mut iter = self.db.raw_iterator_cf_opt(&cf, Self::get_read_opts());
        match prefix_upper_bound(prefix) {
            Some(upper) => {
                iter.seek_for_prev(&upper);
                // The upper bound itself is outside of the prefix
                if iter.key() == Some(upper.as_slice()) {
                    iter.prev();
                }
            }
            None => iter.seek_to_last(),
        }
        let key = match iter.key() {
            Some(key) if key.starts_with(prefix) => Some(key.to_vec()),
            _ => None,
        };
        iter.status().map_err(to_io_error)?;
        Ok(key)
    }

    pub fn sync(&self) -> io::Result<()> {
        self.db.flush_wal(true).map_err(to_io_error)?;
        tracing::debug!("Data is synced with disk");
        Ok(())
    }
}

/// Smallest key greater than every key starting with `prefix`, `None` if the
/// prefix consists of 0xff bytes only.
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

impl Store for RocksStore {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let cf = self.cf()?;
        self.db
            .get_cf_opt(&cf, key, &Self::get_read_opts())
            .map_err(to_io_error)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> io::Result<()> {
        let cf = self.cf()?;
        self.db
            .put_cf_opt(&cf, key, value, &Self::get_write_opts())
            .map_err(to_io_error)
    }

    fn delete(&self, key: &[u8]) -> io::Result<()> {
        let cf = self.cf()?;
        self.db
            .delete_cf_opt(&cf, key, &Self::get_write_opts())
            .map_err(to_io_error)
    }

    fn write_batch(&self, operations: Vec<BatchOperation>) -> io::Result<()> {
        let cf = self.cf()?;
        let mut batch = rocksdb::WriteBatch::default();
        for (key, value) in operations {
            match value {
                Some(value) => batch.put_cf(&cf, key, value),
                None => batch.delete_cf(&cf, key),
            }
        }
        // Single write operation
        self.db
            .write_opt(batch, &Self::get_write_opts())
            .map_err(to_io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rocks_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.put(b"a1", b"x").unwrap();
        store
            .write_batch(vec![
                (b"a2".to_vec(), Some(b"y".to_vec())),
                (b"a1".to_vec(), None),
                (b"b1".to_vec(), Some(b"z".to_vec())),
            ])
            .unwrap();
        assert_eq!(store.get(b"a1").unwrap(), None);
        assert_eq!(store.get(b"a2").unwrap(), Some(b"y".to_vec()));
        store.sync().unwrap();
        drop(store);

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"b1").unwrap(), Some(b"z".to_vec()));
    }

    #[test]
    fn first_and_last_keys_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let keys: [&[u8]; 5] = [b"a", b"b\x00", b"b\x05\x01", b"b\xff", b"c"];
        for key in keys {
            store.put(key, b"v").unwrap();
        }
        assert_eq!(store.first_key_with_prefix(b"b").unwrap(), Some(b"b\x00".to_vec()));
        assert_eq!(store.last_key_with_prefix(b"b").unwrap(), Some(b"b\xff".to_vec()));
        assert_eq!(store.first_key_with_prefix(b"d").unwrap(), None);
        assert_eq!(store.last_key_with_prefix(b"\xff").unwrap(), None);
        assert_eq!(store.last_key_with_prefix(b"c").unwrap(), Some(b"c".to_vec()));
    }

    #[test]
    fn upper_bound_of_prefix() {
        assert_eq!(prefix_upper_bound(b"a"), Some(b"b".to_vec()));
        assert_eq!(prefix_upper_bound(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff"), None);
    }
}
