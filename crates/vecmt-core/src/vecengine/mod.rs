// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! DAG traversal engine shared by the vector clock indexes.
//!
//! The engine assigns every event to a branch of its creator and fills the
//! event's highest-before and lowest-after vectors. The concrete vector types
//! and their persistence belong to the index, which plugs in through
//! [`EngineCallbacks`].

use std::sync::Arc;

use crate::{
    store::Store,
    types::{BranchId, DagEvent, EventHash, Seq},
};

mod branches;
mod engine;

pub use branches::BranchesInfo;
pub use engine::Engine;

/// Vector of the highest ancestors of an event, one slot per branch.
pub trait HighestBeforeVector: Send + Sync {
    /// Marks `event` as the highest event of `branch` it observes.
    fn init_with_event(&mut self, branch: BranchId, event: &dyn DagEvent);

    fn is_empty(&self, branch: BranchId) -> bool;

    fn is_fork_detected(&self, branch: BranchId) -> bool;

    fn seq(&self, branch: BranchId) -> Seq;

    fn min_seq(&self, branch: BranchId) -> Seq;

    fn set_fork_detected(&mut self, branch: BranchId);

    /// Merges the observations of `other` over the first `branches` slots.
    fn collect_from(&mut self, other: &Self, branches: usize);

    /// Folds the `from` branches of `other` into slot `to`.
    fn gather_from(&mut self, to: BranchId, other: &Self, from: &[BranchId]);
}

/// Vector of the lowest descendants of an event, one slot per branch.
pub trait LowestAfterVector: Send + Sync {
    fn init_with_event(&mut self, branch: BranchId, event: &dyn DagEvent);

    /// Records `event` in `branch` unless the slot is already set. Returns
    /// whether the slot changed.
    fn visit(&mut self, branch: BranchId, event: &dyn DagEvent) -> bool;
}

/// Hooks through which the engine reads and writes the vectors of an index.
pub trait EngineCallbacks {
    type HighestBefore: HighestBeforeVector;
    type LowestAfter: LowestAfterVector;

    fn get_highest_before(&self, id: &EventHash) -> Option<Self::HighestBefore>;

    fn set_highest_before(&self, id: &EventHash, vector: &Self::HighestBefore);

    fn get_lowest_after(&self, id: &EventHash) -> Option<Self::LowestAfter>;

    fn set_lowest_after(&self, id: &EventHash, vector: &Self::LowestAfter);

    fn new_highest_before(&self, branches: usize) -> Self::HighestBefore;

    fn new_lowest_after(&self, branches: usize) -> Self::LowestAfter;

    /// The engine switched to a new vector store.
    fn on_db_reset(&self, db: &Arc<dyn Store>);

    /// Everything written since the last flush was dropped.
    fn on_drop_not_flushed(&self);
}
