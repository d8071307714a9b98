// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use eyre::ensure;

use crate::{
    types::{BranchId, DagEvent, Seq},
    vecengine::{HighestBeforeVector, LowestAfterVector},
};

const FORK_DETECTED_MIN_SEQ: Seq = i32::MAX as Seq;

/// Observation of one branch: the highest sequence number seen and the
/// lowest one seen. `seq == 0` means nothing was observed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BranchSeq {
    pub seq: Seq,
    pub min_seq: Seq,
}

impl BranchSeq {
    pub const ENCODED_SIZE: usize = 8;

    pub const fn new(seq: Seq, min_seq: Seq) -> Self {
        Self { seq, min_seq }
    }

    /// Marker of a branch whose creator is known to have forked.
    pub const fn fork_detected() -> Self {
        Self {
            seq: 0,
            min_seq: FORK_DETECTED_MIN_SEQ,
        }
    }

    pub fn is_fork_detected(&self) -> bool {
        self.seq == 0 && self.min_seq == FORK_DETECTED_MIN_SEQ
    }

    pub fn is_empty(&self) -> bool {
        self.seq == 0 && !self.is_fork_detected()
    }
}

impl fmt::Debug for BranchSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fork_detected() {
            write!(f, "fork")
        } else {
            write!(f, "{}..{}", self.min_seq, self.seq)
        }
    }
}

/// Per branch, the highest event of the branch observed by an event.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HighestBeforeSeq(Vec<BranchSeq>);

impl HighestBeforeSeq {
    pub fn new(branches: usize) -> Self {
        Self(vec![BranchSeq::default(); branches])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Slots past the end read as unknown.
    pub fn get(&self, branch: BranchId) -> BranchSeq {
        self.0.get(branch as usize).copied().unwrap_or_default()
    }

    pub fn set(&mut self, branch: BranchId, value: BranchSeq) {
        let branch = branch as usize;
        if branch >= self.0.len() {
            self.0.resize(branch + 1, BranchSeq::default());
        }
        self.0[branch] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = &BranchSeq> + '_ {
        self.0.iter()
    }

    pub fn encoded_size(&self) -> usize {
        self.0.len() * BranchSeq::ENCODED_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        for slot in &self.0 {
            bytes.extend_from_slice(&slot.seq.to_be_bytes());
            bytes.extend_from_slice(&slot.min_seq.to_be_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> eyre::Result<Self> {
        ensure!(
            bytes.len() % BranchSeq::ENCODED_SIZE == 0,
            "malformed highest-before vector of {} bytes",
            bytes.len()
        );
        Ok(Self(
            bytes
                .chunks_exact(BranchSeq::ENCODED_SIZE)
                .map(|chunk| BranchSeq {
                    seq: read_u32(&chunk[..4]),
                    min_seq: read_u32(&chunk[4..]),
                })
                .collect(),
        ))
    }
}

impl fmt::Debug for HighestBeforeSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl HighestBeforeVector for HighestBeforeSeq {
    fn init_with_event(&mut self, branch: BranchId, event: &dyn DagEvent) {
        self.set(branch, BranchSeq::new(event.seq(), event.seq()));
    }

    fn is_empty(&self, branch: BranchId) -> bool {
        self.get(branch).is_empty()
    }

    fn is_fork_detected(&self, branch: BranchId) -> bool {
        self.get(branch).is_fork_detected()
    }

    fn seq(&self, branch: BranchId) -> Seq {
        self.get(branch).seq
    }

    fn min_seq(&self, branch: BranchId) -> Seq {
        self.get(branch).min_seq
    }

    fn set_fork_detected(&mut self, branch: BranchId) {
        self.set(branch, BranchSeq::fork_detected());
    }

    fn collect_from(&mut self, other: &Self, branches: usize) {
        for branch in 0..branches as BranchId {
            let his = other.get(branch);
            if his.is_empty() {
                continue;
            }
            let mut mine = self.get(branch);
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
            }
            self.set(branch, mine);
        }
    }

    fn gather_from(&mut self, to: BranchId, other: &Self, from: &[BranchId]) {
        let mut highest = BranchSeq::default();
        for branch in from {
            let slot = other.get(*branch);
            if slot.is_fork_detected() {
                highest = slot;
                break;
            }
            if slot.seq > highest.seq {
                highest = slot;
            }
        }
        self.set(to, highest);
    }
}

/// Per branch, the sequence number of the lowest event of the branch that
/// observes an event, 0 if none does yet.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LowestAfterSeq(Vec<Seq>);

impl LowestAfterSeq {
    pub const SLOT_SIZE: usize = 4;

    pub fn new(branches: usize) -> Self {
        Self(vec![0; branches])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, branch: BranchId) -> Seq {
        self.0.get(branch as usize).copied().unwrap_or_default()
    }

    pub fn set(&mut self, branch: BranchId, seq: Seq) {
        let branch = branch as usize;
        if branch >= self.0.len() {
            self.0.resize(branch + 1, 0);
        }
        self.0[branch] = seq;
    }

    pub fn encoded_size(&self) -> usize {
        self.0.len() * Self::SLOT_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|seq| seq.to_be_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> eyre::Result<Self> {
        ensure!(
            bytes.len() % Self::SLOT_SIZE == 0,
            "malformed lowest-after vector of {} bytes",
            bytes.len()
        );
        Ok(Self(bytes.chunks_exact(Self::SLOT_SIZE).map(read_u32).collect()))
    }
}

impl fmt::Debug for LowestAfterSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl LowestAfterVector for LowestAfterSeq {
    fn init_with_event(&mut self, branch: BranchId, event: &dyn DagEvent) {
        self.set(branch, event.seq());
    }

    fn visit(&mut self, branch: BranchId, event: &dyn DagEvent) -> bool {
        if self.get(branch) != 0 {
            return false;
        }
        self.set(branch, event.seq());
        true
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    fn vector(slots: &[(Seq, Seq)]) -> HighestBeforeSeq {
        let mut v = HighestBeforeSeq::new(slots.len());
        for (i, (seq, min_seq)) in slots.iter().enumerate() {
            v.set(i as BranchId, BranchSeq::new(*seq, *min_seq));
        }
        v
    }

    #[test]
    fn fork_marker_is_not_empty() {
        let fork = BranchSeq::fork_detected();
        assert!(fork.is_fork_detected());
        assert!(!fork.is_empty());
        assert!(BranchSeq::default().is_empty());
        assert!(!BranchSeq::new(3, 1).is_fork_detected());
    }

    #[test]
    fn collect_takes_max_seq_and_min_min_seq() {
        let mut mine = vector(&[(5, 3), (0, 0), (2, 2)]);
        let his = vector(&[(4, 1), (7, 7), (0, 0)]);
        mine.collect_from(&his, 3);
        assert_eq!(mine, vector(&[(5, 1), (7, 7), (2, 2)]));

        // Idempotent
        let copy = mine.clone();
        mine.collect_from(&his, 3);
        assert_eq!(mine, copy);
    }

    #[test]
    fn collect_propagates_fork_marker() {
        let mut mine = vector(&[(5, 3), (1, 1)]);
        let mut his = vector(&[(9, 9), (0, 0)]);
        his.set_fork_detected(0);
        mine.collect_from(&his, 2);
        assert!(mine.is_fork_detected(0));
        assert_eq!(mine.get(1), BranchSeq::new(1, 1));

        // A detected fork is never reverted
        mine.collect_from(&vector(&[(10, 1), (0, 0)]), 2);
        assert!(mine.is_fork_detected(0));
    }

    #[test]
    fn collect_reads_short_vectors_as_unknown() {
        let mut mine = HighestBeforeSeq::new(4);
        mine.collect_from(&vector(&[(1, 1)]), 4);
        assert_eq!(mine.get(0), BranchSeq::new(1, 1));
        assert_eq!(mine.get(3), BranchSeq::default());
        assert_eq!(mine.len(), 4);
    }

    #[test]
    fn gather_prefers_fork_then_highest_seq() {
        let mut scattered = vector(&[(3, 1), (0, 0), (5, 2), (5, 4)]);
        let mut merged = HighestBeforeSeq::new(2);
        merged.gather_from(0, &scattered, &[0, 2, 3]);
        // Equal seqs: the earlier branch wins
        assert_eq!(merged.get(0), BranchSeq::new(5, 2));
        merged.gather_from(1, &scattered, &[1]);
        assert!(merged.get(1).is_empty());

        scattered.set_fork_detected(3);
        merged.gather_from(0, &scattered, &[0, 2, 3]);
        assert!(merged.is_fork_detected(0));
    }

    #[test]
    fn encoding_is_big_endian() {
        let mut v = vector(&[(1, 1), (0x01020304, 2)]);
        v.set_fork_detected(2);
        let bytes = v.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[8..12], &[1, 2, 3, 4]);
        assert_eq!(&bytes[20..24], &[0x7f, 0xff, 0xff, 0xff]);
        assert_eq!(HighestBeforeSeq::from_bytes(&bytes).unwrap(), v);
        assert!(HighestBeforeSeq::from_bytes(&bytes[..7]).is_err());

        let mut after = LowestAfterSeq::new(2);
        after.set(1, 258);
        assert_eq!(after.to_bytes(), vec![0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(LowestAfterSeq::from_bytes(&after.to_bytes()).unwrap(), after);
        assert!(LowestAfterSeq::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn visit_sets_only_empty_slots() {
        let a1 = Event::new(1, 1, vec![], 0);
        let a2 = Event::new(1, 2, vec![a1.id()], 0);
        let mut after = LowestAfterSeq::new(1);
        assert!(after.visit(0, &a1));
        assert!(!after.visit(0, &a2));
        assert_eq!(after.get(0), 1);
        // Grows for branches opened after the vector was created
        assert!(after.visit(3, &a2));
        assert_eq!(after.len(), 4);
    }
}
