// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

pub type ValidatorId = u32;
/// Dense position of a validator inside one validator set.
pub type ValidatorIndex = u32;
/// Slot of a vector clock. Branches `0..N` are the primary branches of the
/// validators, every observed fork appends one more branch.
pub type BranchId = u32;
pub type Seq = u32;
pub type Timestamp = u64;
pub type Stake = u64;

/// Process-wide policy for errors after which the node can no longer guarantee
/// consensus correctness (storage failures, corrupted vectors).
pub type Crit = Arc<dyn Fn(eyre::Report) + Send + Sync>;

/// Resolves an event identifier to the event, supplied by the consensus engine.
pub type GetEvent = Arc<dyn Fn(&EventHash) -> Option<Arc<dyn DagEvent>> + Send + Sync>;

pub const EVENT_HASH_SIZE: usize = 32;

#[derive(Clone, Copy, Eq, Ord, PartialOrd, PartialEq, Default, Hash, Serialize, Deserialize)]
pub struct EventHash([u8; EVENT_HASH_SIZE]);

impl EventHash {
    pub const fn new(bytes: [u8; EVENT_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for EventHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", hex::encode(self.0))
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", hex::encode(&self.0[..4]))
    }
}

/// A node of the consensus DAG as seen by the vector clock index.
pub trait DagEvent: Send + Sync {
    fn id(&self) -> EventHash;

    fn creator(&self) -> ValidatorId;

    /// Position of the event in its creator's chain, starting at 1.
    fn seq(&self) -> Seq;

    /// Parent references. When present, the self-parent is always the first one.
    fn parents(&self) -> &[EventHash];

    /// Creation time claimed by the creator.
    fn creation_time(&self) -> Timestamp;

    fn self_parent(&self) -> Option<EventHash> {
        if self.seq() <= 1 {
            return None;
        }
        self.parents().first().copied()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Event {
    id: EventHash,
    creator: ValidatorId,
    seq: Seq,
    parents: Vec<EventHash>,
    creation_time: Timestamp,
    payload: Vec<u8>,
}

impl Event {
    pub fn new(
        creator: ValidatorId,
        seq: Seq,
        parents: Vec<EventHash>,
        creation_time: Timestamp,
    ) -> Self {
        Self::new_with_payload(creator, seq, parents, creation_time, Vec::new())
    }

    /// The payload only takes part in the event hash, which lets a validator
    /// create several distinct events with the same sequence number.
    pub fn new_with_payload(
        creator: ValidatorId,
        seq: Seq,
        parents: Vec<EventHash>,
        creation_time: Timestamp,
        payload: Vec<u8>,
    ) -> Self {
        let id = Self::digest(creator, seq, &parents, creation_time, &payload);
        Self {
            id,
            creator,
            seq,
            parents,
            creation_time,
            payload,
        }
    }

    fn digest(
        creator: ValidatorId,
        seq: Seq,
        parents: &[EventHash],
        creation_time: Timestamp,
        payload: &[u8],
    ) -> EventHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&creator.to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(&(parents.len() as u64).to_le_bytes());
        for parent in parents {
            hasher.update(parent.as_bytes());
        }
        hasher.update(&creation_time.to_le_bytes());
        hasher.update(payload);
        EventHash(hasher.finalize().into())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl DagEvent for Event {
    fn id(&self) -> EventHash {
        self.id
    }

    fn creator(&self) -> ValidatorId {
        self.creator
    }

    fn seq(&self) -> Seq {
        self.seq
    }

    fn parents(&self) -> &[EventHash] {
        &self.parents
    }

    fn creation_time(&self) -> Timestamp {
        self.creation_time
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}:[", self.creator, self.seq, self.id)?;
        for parent in &self.parents {
            write!(f, "{parent},")?;
        }
        write!(f, "]")
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn self_parent_is_first_parent_after_first_event() {
        let a1 = Event::new(1, 1, vec![], 10);
        let b1 = Event::new(2, 1, vec![], 10);
        assert_eq!(a1.self_parent(), None);

        let a2 = Event::new(1, 2, vec![a1.id(), b1.id()], 20);
        assert_eq!(a2.self_parent(), Some(a1.id()));

        let b_first = Event::new(2, 1, vec![a1.id()], 20);
        assert_eq!(b_first.self_parent(), None);
    }

    #[test]
    fn payload_distinguishes_forks() {
        let a1 = Event::new(1, 1, vec![], 10);
        let fork = Event::new_with_payload(1, 1, vec![], 10, vec![1]);
        assert_ne!(a1.id(), fork.id());
        assert_eq!(a1.id(), Event::new(1, 1, vec![], 10).id());
    }
}
