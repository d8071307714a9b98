// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use eyre::eyre;

use super::Index;
use crate::types::{BranchId, EventHash, ValidatorId};

impl Index {
    /// Whether `a` is forkless caused by `b`: `a` observes a quorum of
    /// validators observing `b`, and `a` doesn't observe `b`'s creator as a
    /// cheater.
    pub fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool {
        let key = (*a, *b);
        if let Some(result) = self.forkless_cause_pairs.lock().get(&key) {
            return *result;
        }
        let result = self.forkless_cause_uncached(a, b);
        self.forkless_cause_pairs.lock().put(key, result);
        result
    }

    fn forkless_cause_uncached(&self, a_id: &EventHash, b_id: &EventHash) -> bool {
        let Some(a) = self.get_highest_before_seq(a_id) else {
            (self.crit)(eyre!("event A={a_id} not found"));
            return false;
        };

        let info = self.engine.branches_info();
        // B is observed as a cheater by A
        if info.at_least_one_fork() && a.get(self.engine.event_branch_id(b_id)).is_fork_detected() {
            return false;
        }

        let Some(b) = self.get_lowest_after_seq(b_id) else {
            (self.crit)(eyre!("event B={b_id} not found"));
            return false;
        };

        let validators = self.engine.validators();
        let mut yes = validators.new_counter();
        for (branch, creator) in info.branch_id_creator_idxs.iter().enumerate() {
            let branch = branch as BranchId;
            // Lowest event of the branch observing B, highest event of the
            // branch observed by A
            let b_lowest_after = b.get(branch);
            let a_highest_before = a.get(branch);
            if b_lowest_after != 0
                && b_lowest_after <= a_highest_before.seq
                && !a_highest_before.is_fork_detected()
            {
                // A creator may be counted on several branches, only once in stake
                yes.count_by_idx(*creator);
            }
        }
        yes.has_quorum()
    }

    /// Drops the events whose creator is observed as a cheater by
    /// `self_parent`.
    pub fn no_cheaters(
        &self,
        self_parent: Option<&EventHash>,
        options: &[EventHash],
    ) -> Vec<EventHash> {
        let Some(self_parent) = self_parent else {
            return options.to_vec();
        };
        if !self.engine.at_least_one_fork() {
            return options.to_vec();
        }
        // Every branch of a cheater carries the marker, no need to merge
        let Some(highest) = self.get_highest_before_seq(self_parent) else {
            (self.crit)(eyre!("self-parent {self_parent} not found"));
            return options.to_vec();
        };
        options
            .iter()
            .filter(|id| {
                let Some(event) = self.engine.get_event(id) else {
                    (self.crit)(eyre!("event {id} not found"));
                    return false;
                };
                match self.engine.validator_idx(event.creator()) {
                    Some(creator) => !highest.get(creator).is_fork_detected(),
                    None => false,
                }
            })
            .copied()
            .collect()
    }

    /// Validators observed as cheaters by `id`, in validator index order.
    pub fn cheaters(&self, id: &EventHash) -> Vec<ValidatorId> {
        let Some(merged) = self.get_merged_highest_before(id) else {
            return Vec::new();
        };
        let validators = self.engine.validators();
        merged
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_fork_detected())
            .filter_map(|(idx, _)| validators.get_id(idx as u32))
            .collect()
    }
}
