// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use eyre::{bail, ensure, eyre};
use serde::{Deserialize, Serialize};

use crate::{
    config::ImportExport,
    types::{Stake, ValidatorId, ValidatorIndex},
};

/// Weighted validator set of one epoch. Validators are ordered by stake
/// (descending) then by id (ascending); the position in that order is the
/// dense [`ValidatorIndex`] used by every vector clock.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(try_from = "Vec<Validator>", into = "Vec<Validator>")]
pub struct Validators {
    validators: Vec<Validator>,
    total_stake: Stake,
    quorum_threshold: Stake, // Stake strictly above this is a quorum
}

impl Validators {
    pub const DEFAULT_FILENAME: &'static str = "validators.yaml";

    /// Validators with ids `1..=n` and the given stakes.
    pub fn new_test(stake: Vec<Stake>) -> Arc<Self> {
        let validators = stake
            .into_iter()
            .enumerate()
            .map(|(i, stake)| Validator::new(i as ValidatorId + 1, stake))
            .collect();
        Self::new(validators)
    }

    /// Panics on an invalid set, see [`Validators::try_new`].
    pub fn new(validators: Vec<Validator>) -> Arc<Self> {
        match Self::try_build(validators) {
            Ok(validators) => Arc::new(validators),
            Err(e) => panic!("{e}"),
        }
    }

    /// Fails on an empty set, a zero stake or a duplicate id.
    pub fn try_new(validators: Vec<Validator>) -> eyre::Result<Arc<Self>> {
        Ok(Arc::new(Self::try_build(validators)?))
    }

    fn try_build(mut validators: Vec<Validator>) -> eyre::Result<Self> {
        ensure!(!validators.is_empty(), "Empty validator set");
        if let Some(v) = validators.iter().find(|v| v.stake() == 0) {
            bail!("Validator {} has no stake", v.id());
        }
        let mut seen = AHashSet::new();
        if let Some(v) = validators.iter().find(|v| !seen.insert(v.id())) {
            bail!("Duplicate validator id {}", v.id());
        }

        validators.sort_by(|a, b| b.stake.cmp(&a.stake).then(a.id.cmp(&b.id)));

        let mut total_stake: Stake = 0;
        for v in validators.iter() {
            total_stake = total_stake
                .checked_add(v.stake())
                .ok_or_else(|| eyre!("Total stake overflow"))?;
        }
        let quorum_threshold = 2 * total_stake / 3;

        Ok(Validators {
            validators,
            total_stake,
            quorum_threshold,
        })
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = ValidatorId> + '_ {
        self.validators.iter().map(Validator::id)
    }

    pub fn get_id(&self, idx: ValidatorIndex) -> Option<ValidatorId> {
        self.validators.get(idx as usize).map(Validator::id)
    }

    /// Mapping from validator id to its dense index in this set.
    pub fn idxs(&self) -> AHashMap<ValidatorId, ValidatorIndex> {
        self.validators
            .iter()
            .enumerate()
            .map(|(idx, v)| (v.id(), idx as ValidatorIndex))
            .collect()
    }

    pub fn get_stake_by_idx(&self, idx: ValidatorIndex) -> Stake {
        self.validators
            .get(idx as usize)
            .map(Validator::stake)
            .unwrap_or_default()
    }

    pub fn get_stake(&self, id: ValidatorId) -> Option<Stake> {
        self.validators
            .iter()
            .find(|v| v.id() == id)
            .map(Validator::stake)
    }

    pub fn total_stake(&self) -> Stake {
        self.total_stake
    }

    /// Minimum stake which is a quorum.
    pub fn quorum(&self) -> Stake {
        self.quorum_threshold + 1
    }

    pub fn is_quorum(&self, amount: Stake) -> bool {
        amount > self.quorum_threshold
    }

    pub fn new_counter(&self) -> WeightCounter<'_> {
        WeightCounter::new(self)
    }
}

impl TryFrom<Vec<Validator>> for Validators {
    type Error = eyre::Report;

    fn try_from(validators: Vec<Validator>) -> eyre::Result<Self> {
        Self::try_build(validators)
    }
}

impl From<Validators> for Vec<Validator> {
    fn from(validators: Validators) -> Self {
        validators.validators
    }
}

impl ImportExport for Validators {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    id: ValidatorId,
    stake: Stake,
}

impl Validator {
    pub fn new(id: ValidatorId, stake: Stake) -> Self {
        Self { id, stake }
    }

    pub fn id(&self) -> ValidatorId {
        self.id
    }

    pub fn stake(&self) -> Stake {
        self.stake
    }
}

/// Accumulates stake of distinct validators until a quorum is reached.
pub struct WeightCounter<'a> {
    validators: &'a Validators,
    already: Vec<bool>,
    stake: Stake,
}

impl<'a> WeightCounter<'a> {
    fn new(validators: &'a Validators) -> Self {
        Self {
            validators,
            already: vec![false; validators.len()],
            stake: 0,
        }
    }

    /// Returns false if the validator was already counted.
    pub fn count_by_idx(&mut self, idx: ValidatorIndex) -> bool {
        let Some(counted) = self.already.get_mut(idx as usize) else {
            return false;
        };
        if *counted {
            return false;
        }
        *counted = true;
        self.stake += self.validators.get_stake_by_idx(idx);
        true
    }

    pub fn has_quorum(&self) -> bool {
        self.validators.is_quorum(self.stake)
    }

    pub fn get_stake(&self) -> Stake {
        self.stake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validators_are_sorted_by_stake_then_id() {
        let validators = Validators::new(vec![
            Validator::new(5, 1),
            Validator::new(3, 10),
            Validator::new(1, 1),
            Validator::new(2, 10),
        ]);
        assert_eq!(validators.ids().collect::<Vec<_>>(), vec![2, 3, 1, 5]);
        let idxs = validators.idxs();
        assert_eq!(idxs[&2], 0);
        assert_eq!(idxs[&5], 3);
        assert_eq!(validators.get_id(1), Some(3));
        assert_eq!(validators.get_stake_by_idx(0), 10);
        assert_eq!(validators.total_stake(), 22);
    }

    #[test]
    fn quorum_is_more_than_two_thirds() {
        let validators = Validators::new_test(vec![1; 3]);
        assert_eq!(validators.quorum(), 3);
        let validators = Validators::new_test(vec![1; 4]);
        assert_eq!(validators.quorum(), 3);
        assert!(!validators.is_quorum(2));
        assert!(validators.is_quorum(3));
    }

    #[test]
    fn counter_counts_each_validator_once() {
        let validators = Validators::new_test(vec![1; 4]);
        let mut counter = validators.new_counter();
        assert!(counter.count_by_idx(0));
        assert!(!counter.count_by_idx(0));
        assert!(counter.count_by_idx(1));
        assert!(!counter.has_quorum());
        assert!(counter.count_by_idx(3));
        assert!(counter.has_quorum());
        assert_eq!(counter.get_stake(), 3);
        assert!(!counter.count_by_idx(42));
    }

    #[test]
    fn validators_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(Validators::DEFAULT_FILENAME);
        let validators = Validators::new(vec![Validator::new(7, 2), Validator::new(9, 3)]);
        validators.print(&path).unwrap();
        let loaded = Validators::load(&path).unwrap();
        assert_eq!(loaded.ids().collect::<Vec<_>>(), vec![9, 7]);
        assert_eq!(loaded.total_stake(), 5);
        assert_eq!(loaded.quorum(), validators.quorum());
    }

    #[test]
    fn malformed_validator_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(Validators::DEFAULT_FILENAME);
        for (content, error) in [
            ("[]\n", "Empty validator set"),
            ("- id: 1\n  stake: 0\n", "Validator 1 has no stake"),
            ("- id: 1\n  stake: 1\n- id: 1\n  stake: 2\n", "Duplicate validator id 1"),
        ] {
            std::fs::write(&path, content).unwrap();
            let err = Validators::load(&path).unwrap_err();
            assert!(err.to_string().contains(error), "{err}");
        }
        assert!(Validators::try_new(vec![Validator::new(3, 1)]).is_ok());
    }

    #[test]
    #[should_panic(expected = "Duplicate validator id")]
    fn duplicate_ids_are_rejected() {
        Validators::new(vec![Validator::new(1, 1), Validator::new(1, 2)]);
    }
}
