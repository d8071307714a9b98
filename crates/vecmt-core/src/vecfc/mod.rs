// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Base vector clock index: highest-before sequence vectors, lowest-after
//! vectors and the forkless-cause relation built on them.

use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::{
    cache::WeightedLru,
    config::{CacheScale, ImportExport},
    store::{Store, Table},
    types::{Crit, DagEvent, EventHash, GetEvent},
    validators::Validators,
    vecengine::{Engine, EngineCallbacks},
};

mod forkless_cause;
mod vector;

pub use vector::{BranchSeq, HighestBeforeSeq, LowestAfterSeq};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCacheConfig {
    pub forkless_cause_pairs: usize,
    pub highest_before_seq_size: usize,
    pub lowest_after_seq_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub caches: IndexCacheConfig,
}

impl IndexConfig {
    pub fn default_config(scale: CacheScale) -> Self {
        Self {
            caches: IndexCacheConfig {
                forkless_cause_pairs: scale.scale(20000),
                highest_before_seq_size: scale.scale(160 * 1024),
                lowest_after_seq_size: scale.scale(160 * 1024),
            },
        }
    }

    /// Small caches for tests.
    pub fn lite() -> Self {
        Self {
            caches: IndexCacheConfig {
                forkless_cause_pairs: 500,
                highest_before_seq_size: 4 * 1024,
                lowest_after_seq_size: 4 * 1024,
            },
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::default_config(CacheScale::identity())
    }
}

impl ImportExport for IndexConfig {}

struct Tables {
    highest_before_seq: Table,
    lowest_after_seq: Table,
}

/// Vector clock index detecting the forkless-cause relation and forks.
pub struct Index {
    crit: Crit,
    engine: Engine,
    tables: RwLock<Option<Tables>>,
    highest_before_seq: Mutex<WeightedLru<EventHash, HighestBeforeSeq>>,
    lowest_after_seq: Mutex<WeightedLru<EventHash, LowestAfterSeq>>,
    forkless_cause_pairs: Mutex<LruCache<(EventHash, EventHash), bool>>,
}

impl Index {
    pub fn new(crit: Crit, config: IndexConfig) -> eyre::Result<Self> {
        let caches = &config.caches;
        let pairs = NonZeroUsize::new(caches.forkless_cause_pairs)
            .ok_or_else(|| eyre::eyre!("forkless cause cache must allow at least one pair"))?;
        Ok(Self {
            engine: Engine::new(crit.clone()),
            crit,
            tables: RwLock::new(None),
            highest_before_seq: Mutex::new(WeightedLru::new(
                caches.highest_before_seq_size,
                caches.highest_before_seq_size,
            )?),
            lowest_after_seq: Mutex::new(WeightedLru::new(
                caches.lowest_after_seq_size,
                caches.lowest_after_seq_size,
            )?),
            forkless_cause_pairs: Mutex::new(LruCache::new(pairs)),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Binds the index to a validator set and vector store. Must be called
    /// before any other operation.
    pub fn reset(&self, validators: Arc<Validators>, db: Arc<dyn Store>, get_event: GetEvent) {
        self.reset_with(self, validators, db, get_event);
    }

    /// Like [`Index::reset`], with `cb` receiving the engine callbacks. Used
    /// by indexes layered on top of this one.
    pub fn reset_with<C: EngineCallbacks>(
        &self,
        cb: &C,
        validators: Arc<Validators>,
        db: Arc<dyn Store>,
        get_event: GetEvent,
    ) {
        self.engine.reset(cb, validators, db, get_event);
    }

    pub fn add(&self, event: &dyn DagEvent) -> eyre::Result<()> {
        self.engine.add(self, event)
    }

    pub fn flush(&self) {
        self.engine.flush();
    }

    pub fn drop_not_flushed(&self) {
        self.engine.drop_not_flushed(self);
    }

    pub fn get_highest_before_seq(&self, id: &EventHash) -> Option<HighestBeforeSeq> {
        if let Some(vector) = self.highest_before_seq.lock().get(id) {
            return Some(vector.clone());
        }
        let bytes = self.read(|t| &t.highest_before_seq, id)?;
        let vector = match HighestBeforeSeq::from_bytes(&bytes) {
            Ok(vector) => vector,
            Err(e) => {
                (self.crit)(e.wrap_err(format!("corrupted highest-before of {id}")));
                return None;
            }
        };
        self.highest_before_seq
            .lock()
            .add(*id, vector.clone(), bytes.len());
        Some(vector)
    }

    pub fn set_highest_before_seq(&self, id: &EventHash, vector: &HighestBeforeSeq) {
        let bytes = vector.to_bytes();
        self.write(|t| &t.highest_before_seq, id, &bytes);
        self.highest_before_seq
            .lock()
            .add(*id, vector.clone(), bytes.len());
    }

    pub fn get_lowest_after_seq(&self, id: &EventHash) -> Option<LowestAfterSeq> {
        if let Some(vector) = self.lowest_after_seq.lock().get(id) {
            return Some(vector.clone());
        }
        let bytes = self.read(|t| &t.lowest_after_seq, id)?;
        let vector = match LowestAfterSeq::from_bytes(&bytes) {
            Ok(vector) => vector,
            Err(e) => {
                (self.crit)(e.wrap_err(format!("corrupted lowest-after of {id}")));
                return None;
            }
        };
        self.lowest_after_seq
            .lock()
            .add(*id, vector.clone(), bytes.len());
        Some(vector)
    }

    pub fn set_lowest_after_seq(&self, id: &EventHash, vector: &LowestAfterSeq) {
        let bytes = vector.to_bytes();
        self.write(|t| &t.lowest_after_seq, id, &bytes);
        self.lowest_after_seq
            .lock()
            .add(*id, vector.clone(), bytes.len());
    }

    /// Highest-before vector with one slot per validator.
    pub fn get_merged_highest_before(&self, id: &EventHash) -> Option<HighestBeforeSeq> {
        self.engine.get_merged_highest_before(self, id)
    }

    fn read(&self, table: impl Fn(&Tables) -> &Table, id: &EventHash) -> Option<Vec<u8>> {
        let tables = self.tables.read();
        let tables = tables.as_ref().expect("Vector clock index used before reset");
        match table(tables).get(id.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                let e = eyre::Report::new(e).wrap_err(format!("failed to read vector of {id}"));
                (self.crit)(e);
                None
            }
        }
    }

    fn write(&self, table: impl Fn(&Tables) -> &Table, id: &EventHash, bytes: &[u8]) {
        let tables = self.tables.read();
        let tables = tables.as_ref().expect("Vector clock index used before reset");
        if let Err(e) = table(tables).put(id.as_bytes(), bytes) {
            let e = eyre::Report::new(e).wrap_err(format!("failed to write vector of {id}"));
            (self.crit)(e);
        }
    }

    fn purge_caches(&self) {
        self.highest_before_seq.lock().purge();
        self.lowest_after_seq.lock().purge();
        self.forkless_cause_pairs.lock().clear();
    }
}

impl EngineCallbacks for Index {
    type HighestBefore = HighestBeforeSeq;
    type LowestAfter = LowestAfterSeq;

    fn get_highest_before(&self, id: &EventHash) -> Option<HighestBeforeSeq> {
        self.get_highest_before_seq(id)
    }

    fn set_highest_before(&self, id: &EventHash, vector: &HighestBeforeSeq) {
        self.set_highest_before_seq(id, vector);
    }

    fn get_lowest_after(&self, id: &EventHash) -> Option<LowestAfterSeq> {
        self.get_lowest_after_seq(id)
    }

    fn set_lowest_after(&self, id: &EventHash, vector: &LowestAfterSeq) {
        self.set_lowest_after_seq(id, vector);
    }

    fn new_highest_before(&self, branches: usize) -> HighestBeforeSeq {
        HighestBeforeSeq::new(branches)
    }

    fn new_lowest_after(&self, branches: usize) -> LowestAfterSeq {
        LowestAfterSeq::new(branches)
    }

    fn on_db_reset(&self, db: &Arc<dyn Store>) {
        *self.tables.write() = Some(Tables {
            highest_before_seq: Table::new(db.clone(), b"S"),
            lowest_after_seq: Table::new(db.clone(), b"s"),
        });
    }

    fn on_drop_not_flushed(&self) {
        self.purge_caches();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        test_util::{test_crit, Dag},
    };

    fn index(dag: &Dag) -> Index {
        let index = Index::new(test_crit(), IndexConfig::lite()).unwrap();
        index.reset(dag.validators(), Arc::new(MemoryStore::new()), dag.resolver());
        dag.add_all(|e| index.add(e)).unwrap();
        index
    }

    #[test]
    fn vectors_without_forks() {
        let dag = Dag::draw(3, "a1; b1; c1; a2:[b1]; b2:[a2]");
        let index = index(&dag);

        let a2 = index.get_highest_before_seq(&dag.id("a2")).unwrap();
        assert_eq!(a2.get(0), BranchSeq::new(2, 1));
        assert_eq!(a2.get(1), BranchSeq::new(1, 1));
        assert!(a2.get(2).is_empty());

        // b2 is the lowest event of b observing a1, a2 is the lowest of a
        let a1 = index.get_lowest_after_seq(&dag.id("a1")).unwrap();
        assert_eq!(a1.get(0), 1);
        assert_eq!(a1.get(1), 2);
        assert_eq!(a1.get(2), 0);
        let b1 = index.get_lowest_after_seq(&dag.id("b1")).unwrap();
        assert_eq!(b1.get(0), 2);
        assert_eq!(b1.get(1), 1);

        // Nothing to merge
        assert_eq!(index.get_merged_highest_before(&dag.id("b2")).unwrap().len(), 3);
    }

    #[test]
    fn unknown_event_has_no_vectors() {
        let dag = Dag::draw(3, "a1");
        let index = index(&dag);
        assert!(index.get_highest_before_seq(&EventHash::default()).is_none());
        assert!(index.get_lowest_after_seq(&EventHash::default()).is_none());
    }

    #[test]
    fn overlapping_branches_are_detected() {
        // a2 and a2' share a1, so a's branches overlap as soon as both are seen
        let dag = Dag::draw(3, "a1; b1; c1; a2:[b1]; a2':[c1]; b2:[a2]; c2:[a2']; b3:[c2]");
        let index = index(&dag);

        let b2 = index.get_highest_before_seq(&dag.id("b2")).unwrap();
        assert!(!b2.get(0).is_fork_detected());
        let b3 = index.get_highest_before_seq(&dag.id("b3")).unwrap();
        assert!(b3.get(0).is_fork_detected());
        assert!(b3.get(3).is_fork_detected());
        assert_eq!(b3.get(2), BranchSeq::new(2, 1));

        let merged = index.get_merged_highest_before(&dag.id("b3")).unwrap();
        assert_eq!(merged.len(), 3);
        assert!(merged.get(0).is_fork_detected());
        assert_eq!(merged.get(1), BranchSeq::new(3, 1));
    }

    #[test]
    fn caches_are_read_through() {
        let dag = Dag::draw(3, "a1; b1; a2:[b1]");
        let index = index(&dag);
        let expected = index.get_highest_before_seq(&dag.id("a2")).unwrap();
        index.purge_caches();
        assert_eq!(index.get_highest_before_seq(&dag.id("a2")), Some(expected));
    }

    #[test]
    fn config_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fc.yaml");
        let config = IndexConfig::default_config(CacheScale::ratio(2, 1));
        assert_eq!(config.caches.forkless_cause_pairs, 10000);
        config.print(&path).unwrap();
        assert_eq!(IndexConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn zero_sized_caches_are_rejected() {
        let mut config = IndexConfig::lite();
        config.caches.forkless_cause_pairs = 0;
        assert!(Index::new(test_crit(), config).is_err());
    }
}
