// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::types::{BranchId, Seq, ValidatorIndex};

/// Branch bookkeeping of one epoch. Branch `i < N` is the primary branch of
/// validator index `i`; every observed fork appends a branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchesInfo {
    /// Highest sequence number added to each branch.
    pub branch_id_last_seq: Vec<Seq>,
    /// Creator of each branch.
    pub branch_id_creator_idxs: Vec<ValidatorIndex>,
    /// Branches of each creator, in creation order.
    pub branch_id_by_creators: Vec<Vec<BranchId>>,
}

impl BranchesInfo {
    pub fn new(validators: usize) -> Self {
        Self {
            branch_id_last_seq: vec![0; validators],
            branch_id_creator_idxs: (0..validators as ValidatorIndex).collect(),
            branch_id_by_creators: (0..validators as BranchId).map(|i| vec![i]).collect(),
        }
    }

    pub fn branch_count(&self) -> usize {
        self.branch_id_creator_idxs.len()
    }

    pub fn validators(&self) -> usize {
        self.branch_id_by_creators.len()
    }

    pub fn at_least_one_fork(&self) -> bool {
        self.branch_count() > self.validators()
    }

    pub fn creator_of(&self, branch: BranchId) -> Option<ValidatorIndex> {
        self.branch_id_creator_idxs.get(branch as usize).copied()
    }

    pub(crate) fn is_consistent(&self, validators: usize) -> bool {
        self.branch_id_last_seq.len() == self.branch_id_creator_idxs.len()
            && self.branch_count() >= validators
            && self.validators() == validators
    }

    /// Appends a branch for `creator` whose last event has `seq`.
    pub(crate) fn open_branch(&mut self, creator: ValidatorIndex, seq: Seq) -> BranchId {
        let branch = self.branch_count() as BranchId;
        self.branch_id_last_seq.push(seq);
        self.branch_id_creator_idxs.push(creator);
        self.branch_id_by_creators[creator as usize].push(branch);
        branch
    }

    pub(crate) fn to_bytes(&self) -> eyre::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> eyre::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
