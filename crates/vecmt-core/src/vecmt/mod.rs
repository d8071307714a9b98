// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Vector clock index with creation times: detects the forkless-cause
//! relation and forks, and calculates BFT median timestamps.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::{
    cache::WeightedLru,
    config::{CacheScale, ImportExport},
    metrics::Metrics,
    store::{Store, Table},
    types::{Crit, DagEvent, EventHash, GetEvent, ValidatorId},
    validators::Validators,
    vecengine::{Engine, EngineCallbacks},
    vecfc::{self, LowestAfterSeq},
};

mod median_time;
mod store;
mod vector;

pub use vector::{HighestBefore, HighestBeforeTime};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCacheConfig {
    pub highest_before_time_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub fc: vecfc::IndexConfig,
    pub caches: IndexCacheConfig,
}

impl IndexConfig {
    pub fn default_config(scale: CacheScale) -> Self {
        Self {
            fc: vecfc::IndexConfig::default_config(scale),
            caches: IndexCacheConfig {
                highest_before_time_size: scale.scale(160 * 1024),
            },
        }
    }

    /// Small caches for tests.
    pub fn lite() -> Self {
        Self {
            fc: vecfc::IndexConfig::lite(),
            caches: IndexCacheConfig {
                highest_before_time_size: 4 * 1024,
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

/// Vector clock index: the base index extended with the creation times of the
/// highest observed events.
///
/// All methods take `&self`. Mutations (`add`, `flush`, `drop_not_flushed`,
/// `reset`) must be serialized by the caller, queries may run concurrently.
pub struct Index {
    base: Arc<vecfc::Index>,
    crit: Crit,
    highest_before_time_table: RwLock<Option<Table>>,
    highest_before_time_cache: Mutex<WeightedLru<EventHash, HighestBeforeTime>>,
    metrics: Option<Arc<Metrics>>,
    config: IndexConfig,
}

impl Index {
    pub fn new(crit: Crit, config: IndexConfig) -> eyre::Result<Self> {
        let base = Arc::new(vecfc::Index::new(crit.clone(), config.fc.clone())?);
        Self::new_with_base(crit, config, base)
    }

    /// Index sharing an existing base index. The base keeps its own caches
    /// and tables; only the time part is owned by the new index.
    pub fn new_with_base(
        crit: Crit,
        config: IndexConfig,
        base: Arc<vecfc::Index>,
    ) -> eyre::Result<Self> {
        let size = config.caches.highest_before_time_size;
        Ok(Self {
            base,
            crit,
            highest_before_time_table: RwLock::new(None),
            highest_before_time_cache: Mutex::new(WeightedLru::new(size, size)?),
            metrics: None,
            config,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn base(&self) -> &Arc<vecfc::Index> {
        &self.base
    }

    pub fn engine(&self) -> &Engine {
        self.base.engine()
    }

    /// Binds the index to a validator set, vector store and event resolver,
    /// dropping all caches. Must be called before any other operation.
    pub fn reset(&self, validators: Arc<Validators>, db: Arc<dyn Store>, get_event: GetEvent) {
        self.base.reset_with(self, validators, db, get_event);
        self.purge_caches();
    }

    pub fn add(&self, event: &dyn DagEvent) -> eyre::Result<()> {
        let branches = self.engine().branch_count();
        self.engine().add(self, event)?;
        if let Some(metrics) = &self.metrics {
            metrics.events_indexed_total.inc();
            let opened = self.engine().branch_count().saturating_sub(branches);
            metrics.forks_observed_total.inc_by(opened as u64);
        }
        Ok(())
    }

    pub fn flush(&self) {
        self.engine().flush();
    }

    /// Rolls back everything added since the last flush.
    pub fn drop_not_flushed(&self) {
        self.engine().drop_not_flushed(self);
    }

    /// `None` if the event was never indexed.
    pub fn get_highest_before(&self, id: &EventHash) -> Option<HighestBefore> {
        let seq = self.base.get_highest_before_seq(id)?;
        let time = self.get_highest_before_time(id)?;
        Some(HighestBefore { seq, time })
    }

    pub fn set_highest_before(&self, id: &EventHash, vector: &HighestBefore) {
        self.set_highest_before_time(id, &vector.time);
        self.base.set_highest_before_seq(id, &vector.seq);
    }

    /// The highest-before vector with one slot per validator index.
    pub fn get_merged_highest_before(&self, id: &EventHash) -> Option<HighestBefore> {
        self.engine().get_merged_highest_before(self, id)
    }

    pub fn get_lowest_after(&self, id: &EventHash) -> Option<LowestAfterSeq> {
        self.base.get_lowest_after_seq(id)
    }

    pub fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool {
        self.base.forkless_cause(a, b)
    }

    pub fn no_cheaters(
        &self,
        self_parent: Option<&EventHash>,
        options: &[EventHash],
    ) -> Vec<EventHash> {
        self.base.no_cheaters(self_parent, options)
    }

    pub fn cheaters(&self, id: &EventHash) -> Vec<ValidatorId> {
        self.base.cheaters(id)
    }

    fn purge_caches(&self) {
        self.highest_before_time_cache.lock().purge();
    }
}

impl EngineCallbacks for Index {
    type HighestBefore = HighestBefore;
    type LowestAfter = LowestAfterSeq;

    fn get_highest_before(&self, id: &EventHash) -> Option<HighestBefore> {
        Index::get_highest_before(self, id)
    }

    fn set_highest_before(&self, id: &EventHash, vector: &HighestBefore) {
        Index::set_highest_before(self, id, vector);
    }

    fn get_lowest_after(&self, id: &EventHash) -> Option<LowestAfterSeq> {
        self.base.get_lowest_after_seq(id)
    }

    fn set_lowest_after(&self, id: &EventHash, vector: &LowestAfterSeq) {
        self.base.set_lowest_after_seq(id, vector);
    }

    fn new_highest_before(&self, branches: usize) -> HighestBefore {
        HighestBefore::new(branches)
    }

    fn new_lowest_after(&self, branches: usize) -> LowestAfterSeq {
        LowestAfterSeq::new(branches)
    }

    fn on_db_reset(&self, db: &Arc<dyn Store>) {
        self.base.on_db_reset(db);
        *self.highest_before_time_table.write() = Some(Table::new(db.clone(), b"T"));
    }

    fn on_drop_not_flushed(&self) {
        self.base.on_drop_not_flushed();
        self.purge_caches();
    }
}
