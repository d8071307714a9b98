// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use eyre::ensure;

use crate::{
    types::{BranchId, DagEvent, Seq, Timestamp},
    vecengine::HighestBeforeVector,
    vecfc::{BranchSeq, HighestBeforeSeq},
};

/// Per branch, the creation time of the highest observed event of the branch.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HighestBeforeTime(Vec<Timestamp>);

impl HighestBeforeTime {
    pub const SLOT_SIZE: usize = 8;

    pub fn new(branches: usize) -> Self {
        Self(vec![0; branches])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, branch: BranchId) -> Timestamp {
        self.0.get(branch as usize).copied().unwrap_or_default()
    }

    pub fn set(&mut self, branch: BranchId, time: Timestamp) {
        let branch = branch as usize;
        if branch >= self.0.len() {
            self.0.resize(branch + 1, 0);
        }
        self.0[branch] = time;
    }

    pub fn encoded_size(&self) -> usize {
        self.0.len() * Self::SLOT_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|time| time.to_be_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> eyre::Result<Self> {
        ensure!(
            bytes.len() % Self::SLOT_SIZE == 0,
            "malformed highest-before time vector of {} bytes",
            bytes.len()
        );
        Ok(Self(
            bytes
                .chunks_exact(Self::SLOT_SIZE)
                .map(|chunk| {
                    let mut buf = [0u8; Self::SLOT_SIZE];
                    buf.copy_from_slice(chunk);
                    Timestamp::from_be_bytes(buf)
                })
                .collect(),
        ))
    }
}

impl fmt::Debug for HighestBeforeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// Highest-before vector with the creation times of the observed events.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HighestBefore {
    pub seq: HighestBeforeSeq,
    pub time: HighestBeforeTime,
}

impl HighestBefore {
    pub fn new(branches: usize) -> Self {
        Self {
            seq: HighestBeforeSeq::new(branches),
            time: HighestBeforeTime::new(branches),
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn get(&self, branch: BranchId) -> (BranchSeq, Timestamp) {
        (self.seq.get(branch), self.time.get(branch))
    }
}

impl fmt::Debug for HighestBefore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries((0..self.len() as BranchId).map(|b| self.get(b)))
            .finish()
    }
}

impl HighestBeforeVector for HighestBefore {
    fn init_with_event(&mut self, branch: BranchId, event: &dyn DagEvent) {
        self.seq.init_with_event(branch, event);
        self.time.set(branch, event.creation_time());
    }

    fn is_empty(&self, branch: BranchId) -> bool {
        self.seq.get(branch).is_empty()
    }

    fn is_fork_detected(&self, branch: BranchId) -> bool {
        self.seq.get(branch).is_fork_detected()
    }

    fn seq(&self, branch: BranchId) -> Seq {
        self.seq.get(branch).seq
    }

    fn min_seq(&self, branch: BranchId) -> Seq {
        self.seq.get(branch).min_seq
    }

    fn set_fork_detected(&mut self, branch: BranchId) {
        self.seq.set_fork_detected(branch);
        self.time.set(branch, 0);
    }

    fn collect_from(&mut self, other: &Self, branches: usize) {
        for branch in 0..branches as BranchId {
            let his = other.seq.get(branch);
            if his.is_empty() {
                continue;
            }
            let mut mine = self.seq.get(branch);
            if mine.is_fork_detected() {
                continue;
            }
            if his.is_fork_detected() {
                self.set_fork_detected(branch);
                continue;
            }
            if mine.seq == 0 || mine.min_seq > his.min_seq {
                mine.min_seq = his.min_seq;
            }
            if mine.seq < his.seq {
                mine.seq = his.seq;
                self.time.set(branch, other.time.get(branch));
            }
            self.seq.set(branch, mine);
        }
    }

    fn gather_from(&mut self, to: BranchId, other: &Self, from: &[BranchId]) {
        let mut highest = (BranchSeq::default(), 0);
        for branch in from {
            let (seq, time) = other.get(*branch);
            if seq.is_fork_detected() {
                highest = (seq, time);
                break;
            }
            if seq.seq > highest.0.seq {
                highest = (seq, time);
            }
        }
        self.seq.set(to, highest.0);
        self.time.set(to, highest.1);
    }
}
