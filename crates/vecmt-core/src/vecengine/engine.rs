// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ahash::AHashMap;
use eyre::{bail, ensure, eyre};
use parking_lot::{Mutex, RwLock};

use super::{BranchesInfo, EngineCallbacks, HighestBeforeVector, LowestAfterVector};
use crate::{
    store::{Flushable, Store, Table},
    types::{
        BranchId, Crit, DagEvent, EventHash, GetEvent, ValidatorId, ValidatorIndex,
    },
    validators::Validators,
};

const BRANCHES_INFO_KEY: &[u8] = b"current";

/// Everything bound by [`Engine::reset`].
struct Epoch {
    validators: Arc<Validators>,
    validator_idxs: AHashMap<ValidatorId, ValidatorIndex>,
    get_event: GetEvent,
    db: Arc<Flushable>,
    event_branch: Table,
    branches_info: Table,
}

/// Computes the vectors of new events and keeps the branch bookkeeping.
///
/// Locks are only taken for short critical sections and never held while a
/// callback runs, so callbacks are free to call back into the engine.
pub struct Engine {
    crit: Crit,
    epoch: RwLock<Option<Arc<Epoch>>>,
    // Lazily loaded from the store, dropped together with unflushed writes
    bi: Mutex<Option<BranchesInfo>>,
}

impl Engine {
    pub fn new(crit: Crit) -> Self {
        Self {
            crit,
            epoch: RwLock::new(None),
            bi: Mutex::new(None),
        }
    }

    fn epoch(&self) -> Arc<Epoch> {
        self.epoch
            .read()
            .clone()
            .expect("Vector clock engine used before reset")
    }

    /// Binds a new validator set and vector store. Unflushed data of the
    /// previous binding is dropped.
    pub fn reset<C: EngineCallbacks>(
        &self,
        cb: &C,
        validators: Arc<Validators>,
        db: Arc<dyn Store>,
        get_event: GetEvent,
    ) {
        let db = Arc::new(Flushable::wrap(db));
        let store: Arc<dyn Store> = db.clone();
        let epoch = Epoch {
            validator_idxs: validators.idxs(),
            validators,
            get_event,
            db,
            event_branch: Table::new(store.clone(), b"b"),
            branches_info: Table::new(store.clone(), b"B"),
        };
        *self.epoch.write() = Some(Arc::new(epoch));
        self.drop_not_flushed(cb);
        cb.on_db_reset(&store);
    }

    pub fn validators(&self) -> Arc<Validators> {
        self.epoch().validators.clone()
    }

    pub fn validator_idx(&self, id: ValidatorId) -> Option<ValidatorIndex> {
        self.epoch().validator_idxs.get(&id).copied()
    }

    pub fn get_event(&self, id: &EventHash) -> Option<Arc<dyn DagEvent>> {
        (self.epoch().get_event)(id)
    }

    /// Calculates and stores the vectors of `event`. All parents must have
    /// been added before.
    pub fn add<C: EngineCallbacks>(&self, cb: &C, event: &dyn DagEvent) -> eyre::Result<()> {
        let epoch = self.epoch();
        let id = event.id();
        let Some(me) = epoch.validator_idxs.get(&event.creator()).copied() else {
            bail!("event {id} created by unknown validator {}", event.creator());
        };

        let parents = event
            .parents()
            .iter()
            .map(|parent| {
                cb.get_highest_before(parent).ok_or_else(|| {
                    eyre!("processed out of order, parent not found (inconsistent DB), parent={parent}")
                })
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        let self_parent_branch = event.self_parent().map(|sp| self.event_branch_id(&sp));

        let validators = epoch.validators.len();
        let (branch, info) = self.with_branches_info_mut(|info| -> eyre::Result<_> {
            let branch =
                Self::fill_global_branch_id(info, validators, event, me, self_parent_branch)?;
            Ok((branch, info.clone()))
        })?;
        let branches = info.branch_count();

        let mut before = cb.new_highest_before(branches);
        let mut after = cb.new_lowest_after(branches);
        // Observed by itself
        after.init_with_event(branch, event);
        before.init_with_event(branch, event);
        for parent in &parents {
            before.collect_from(parent, branches);
        }
        if info.at_least_one_fork() {
            Self::detect_forks(&info, &mut before);
        }

        // The new event is the lowest descendant on its branch for every
        // ancestor that has none yet
        self.dfs_subgraph(event, |walk| {
            let walk_id = walk.id();
            let mut walk_after = cb
                .get_lowest_after(&walk_id)
                .ok_or_else(|| eyre!("lowest-after vector of {walk_id} not found"))?;
            if !walk_after.visit(branch, event) {
                return Ok(false);
            }
            cb.set_lowest_after(&walk_id, &walk_after);
            Ok(true)
        })?;

        self.set_event_branch_id(&epoch, &id, branch);
        cb.set_highest_before(&id, &before);
        cb.set_lowest_after(&id, &after);
        tracing::trace!("Indexed event {id} on branch {branch}");
        Ok(())
    }

    fn fill_global_branch_id(
        info: &mut BranchesInfo,
        validators: usize,
        event: &dyn DagEvent,
        me: ValidatorIndex,
        self_parent_branch: Option<BranchId>,
    ) -> eyre::Result<BranchId> {
        ensure!(
            info.is_consistent(validators),
            "inconsistent branches info (inconsistent DB)"
        );
        let seq = event.seq();
        let Some(sp_branch) = self_parent_branch else {
            ensure!(
                seq == 1,
                "event {} without self-parent isn't first, seq={seq}",
                event.id()
            );
            if info.branch_id_last_seq[me as usize] == 0 {
                info.branch_id_last_seq[me as usize] = 1;
                return Ok(me);
            }
            return Ok(Self::open_branch(info, event, me));
        };

        ensure!(
            info.creator_of(sp_branch) == Some(me),
            "misbehaviour of the self-parent creator of {} (inconsistent DB)",
            event.id()
        );
        let Some(last_seq) = info.branch_id_last_seq.get_mut(sp_branch as usize) else {
            bail!("self-parent branch {sp_branch} of {} doesn't exist", event.id());
        };
        if last_seq.checked_add(1) == Some(seq) {
            *last_seq = seq;
            return Ok(sp_branch);
        }
        Ok(Self::open_branch(info, event, me))
    }

    fn open_branch(info: &mut BranchesInfo, event: &dyn DagEvent, me: ValidatorIndex) -> BranchId {
        let branch = info.open_branch(me, event.seq());
        tracing::debug!(
            "Fork of validator {} at seq {}: event {} opens branch {branch}",
            event.creator(),
            event.seq(),
            event.id()
        );
        branch
    }

    /// Marks forks the parents didn't observe: either one branch of a creator
    /// already observes the fork, or two branches of a creator overlap.
    fn detect_forks<H: HighestBeforeVector>(info: &BranchesInfo, before: &mut H) {
        for branches in &info.branch_id_by_creators {
            if branches.len() <= 1 {
                continue;
            }
            if branches.iter().any(|b| before.is_fork_detected(*b)) {
                Self::mark_forked(before, branches);
            }
        }

        for (creator, branches) in info.branch_id_by_creators.iter().enumerate() {
            if before.is_fork_detected(creator as BranchId) {
                continue;
            }
            let overlap = branches.iter().any(|&a| {
                branches.iter().any(|&b| {
                    a != b
                        && !before.is_empty(a)
                        && !before.is_empty(b)
                        && before.min_seq(a) <= before.seq(b)
                        && before.min_seq(b) <= before.seq(a)
                })
            });
            if overlap {
                Self::mark_forked(before, branches);
            }
        }
    }

    fn mark_forked<H: HighestBeforeVector>(before: &mut H, branches: &[BranchId]) {
        for branch in branches {
            before.set_fork_detected(*branch);
        }
    }

    /// Walks the ancestors of `head` depth first, excluding `head` itself.
    /// Ancestors of an event are skipped when `walk` returns `false` for it.
    pub fn dfs_subgraph(
        &self,
        head: &dyn DagEvent,
        mut walk: impl FnMut(&dyn DagEvent) -> eyre::Result<bool>,
    ) -> eyre::Result<()> {
        let epoch = self.epoch();
        let mut stack: Vec<EventHash> = Vec::with_capacity(epoch.validators.len() * 5);
        stack.extend_from_slice(head.parents());
        while let Some(id) = stack.pop() {
            let Some(event) = (epoch.get_event)(&id) else {
                bail!("event {id} not found");
            };
            if !walk(event.as_ref())? {
                continue;
            }
            stack.extend_from_slice(event.parents());
        }
        Ok(())
    }

    /// The highest-before vector of `id` with one slot per validator, all
    /// branches of a validator folded into its slot.
    pub fn get_merged_highest_before<C: EngineCallbacks>(
        &self,
        cb: &C,
        id: &EventHash,
    ) -> Option<C::HighestBefore> {
        let scattered = cb.get_highest_before(id)?;
        let by_creators = self.with_branches_info(|info| {
            info.at_least_one_fork()
                .then(|| info.branch_id_by_creators.clone())
        });
        let Some(by_creators) = by_creators else {
            return Some(scattered);
        };
        let mut merged = cb.new_highest_before(by_creators.len());
        for (creator, branches) in by_creators.iter().enumerate() {
            merged.gather_from(creator as BranchId, &scattered, branches);
        }
        Some(merged)
    }

    pub fn event_branch_id(&self, id: &EventHash) -> BranchId {
        let epoch = self.epoch();
        match epoch.event_branch.get(id.as_bytes()) {
            Ok(Some(bytes)) => match <[u8; 4]>::try_from(bytes.as_slice()) {
                Ok(bytes) => return BranchId::from_be_bytes(bytes),
                Err(_) => (self.crit)(eyre!("malformed branch id of event {id}")),
            },
            Ok(None) => (self.crit)(eyre!(
                "failed to read branch id of event {id} (inconsistent DB)"
            )),
            Err(e) => (self.crit)(eyre::Report::new(e).wrap_err("failed to read event branch")),
        }
        0
    }

    fn set_event_branch_id(&self, epoch: &Epoch, id: &EventHash, branch: BranchId) {
        if let Err(e) = epoch.event_branch.put(id.as_bytes(), &branch.to_be_bytes()) {
            (self.crit)(eyre::Report::new(e).wrap_err("failed to write event branch"));
        }
    }

    pub fn at_least_one_fork(&self) -> bool {
        self.with_branches_info(BranchesInfo::at_least_one_fork)
    }

    pub fn branch_count(&self) -> usize {
        self.with_branches_info(BranchesInfo::branch_count)
    }

    pub fn branches_info(&self) -> BranchesInfo {
        self.with_branches_info(BranchesInfo::clone)
    }

    pub fn with_branches_info<R>(&self, f: impl FnOnce(&BranchesInfo) -> R) -> R {
        self.with_branches_info_mut(|info| f(info))
    }

    fn with_branches_info_mut<R>(&self, f: impl FnOnce(&mut BranchesInfo) -> R) -> R {
        let epoch = self.epoch();
        let mut bi = self.bi.lock();
        let info = bi.get_or_insert_with(|| self.load_branches_info(&epoch));
        f(info)
    }

    fn load_branches_info(&self, epoch: &Epoch) -> BranchesInfo {
        match epoch.branches_info.get(BRANCHES_INFO_KEY) {
            Ok(Some(bytes)) => match BranchesInfo::from_bytes(&bytes) {
                Ok(info) => return info,
                Err(e) => (self.crit)(e.wrap_err("failed to decode branches info")),
            },
            // First run
            Ok(None) => {}
            Err(e) => (self.crit)(eyre::Report::new(e).wrap_err("failed to read branches info")),
        }
        BranchesInfo::new(epoch.validators.len())
    }

    /// Persists the branch bookkeeping and commits all buffered writes.
    pub fn flush(&self) {
        let epoch = self.epoch();
        let info = self.bi.lock().clone();
        if let Some(info) = info {
            let result = info
                .to_bytes()
                .and_then(|bytes| Ok(epoch.branches_info.put(BRANCHES_INFO_KEY, &bytes)?));
            if let Err(e) = result {
                (self.crit)(e.wrap_err("failed to write branches info"));
            }
        }
        if let Err(e) = epoch.db.flush() {
            (self.crit)(eyre::Report::new(e).wrap_err("failed to flush vector store"));
        }
    }

    pub fn drop_not_flushed<C: EngineCallbacks>(&self, cb: &C) {
        let epoch = self.epoch();
        *self.bi.lock() = None;
        epoch.db.drop_not_flushed();
        cb.on_drop_not_flushed();
    }

    pub fn not_flushed_size(&self) -> usize {
        self.epoch().db.not_flushed_size()
    }
}
