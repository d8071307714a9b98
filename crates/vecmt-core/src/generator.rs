// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ahash::AHashMap;
use eyre::ensure;
use parking_lot::RwLock;
use rand::{prelude::SliceRandom, rngs::StdRng, Rng, SeedableRng};

use crate::{
    types::{DagEvent, Event, EventHash, GetEvent, Timestamp, ValidatorId},
    validators::Validators,
};

const MAX_OTHER_PARENTS: usize = 3;
const FORK_PROBABILITY: f64 = 0.2;

/// Deterministic random DAG generator. The validators with the `cheaters`
/// highest indexes occasionally fork their own chain.
pub struct DagGenerator {
    rng: StdRng,
    validators: Arc<Validators>,
    cheaters: Vec<ValidatorId>,
    /// Tips of every branch of every validator.
    heads: AHashMap<ValidatorId, Vec<Arc<Event>>>,
    events: Arc<RwLock<AHashMap<EventHash, Arc<Event>>>>,
    time: Timestamp,
}

impl DagGenerator {
    pub fn new(validators: Arc<Validators>, cheaters: usize, seed: u64) -> eyre::Result<Self> {
        ensure!(!validators.is_empty(), "no validators to generate events for");
        ensure!(
            cheaters <= validators.len(),
            "{cheaters} cheaters out of {} validators",
            validators.len()
        );
        let ids: Vec<_> = validators.ids().collect();
        let cheaters = ids.iter().rev().take(cheaters).copied().collect();
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            validators,
            cheaters,
            heads: AHashMap::new(),
            events: Default::default(),
            time: 0,
        })
    }

    pub fn validators(&self) -> &Arc<Validators> {
        &self.validators
    }

    pub fn cheaters(&self) -> &[ValidatorId] {
        &self.cheaters
    }

    /// Resolves every event generated so far, including later ones.
    pub fn resolver(&self) -> GetEvent {
        let events = self.events.clone();
        Arc::new(move |id: &EventHash| -> Option<Arc<dyn DagEvent>> {
            events.read().get(id).map(|e| e.clone() as Arc<dyn DagEvent>)
        })
    }

    pub fn generate(&mut self, count: usize) -> Vec<Arc<Event>> {
        (0..count).map(|_| self.next_event()).collect()
    }

    pub fn next_event(&mut self) -> Arc<Event> {
        let ids: Vec<_> = self.validators.ids().collect();
        let creator = ids[self.rng.gen_range(0..ids.len())];
        self.time += self.rng.gen_range(1..=100);

        let own_heads = self.heads.get(&creator).cloned().unwrap_or_default();
        let fork = self.cheaters.contains(&creator)
            && !own_heads.is_empty()
            && self.rng.gen_bool(FORK_PROBABILITY);
        let tip = own_heads.choose(&mut self.rng).cloned();

        let (seq, mut parents) = match (&tip, fork) {
            // Sibling of the tip: same seq, same self-parent
            (Some(tip), true) => (tip.seq(), tip.self_parent().into_iter().collect::<Vec<_>>()),
            (Some(tip), false) => (tip.seq() + 1, vec![tip.id()]),
            (None, _) => (1, vec![]),
        };

        let others: Vec<_> = ids.iter().filter(|id| **id != creator).copied().collect();
        let count = self.rng.gen_range(0..=MAX_OTHER_PARENTS.min(others.len()));
        let chosen: Vec<_> = others
            .choose_multiple(&mut self.rng, count)
            .copied()
            .collect();
        for other in chosen {
            if let Some(head) = self.heads.get(&other).and_then(|h| h.choose(&mut self.rng)) {
                parents.push(head.id());
            }
        }

        let payload = if fork {
            self.rng.gen::<u64>().to_le_bytes().to_vec()
        } else {
            Vec::new()
        };
        let event = Arc::new(Event::new_with_payload(
            creator, seq, parents, self.time, payload,
        ));

        let heads = self.heads.entry(creator).or_default();
        match (tip, fork) {
            (Some(tip), false) => {
                let position = heads.iter().position(|h| h.id() == tip.id());
                if let Some(position) = position {
                    heads[position] = event.clone();
                }
            }
            _ => heads.push(event.clone()),
        }
        self.events.write().insert(event.id(), event.clone());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let validators = Validators::new_test(vec![1; 4]);
        let first = DagGenerator::new(validators.clone(), 1, 7).unwrap().generate(50);
        let second = DagGenerator::new(validators, 1, 7).unwrap().generate(50);
        assert_eq!(first, second);
    }

    #[test]
    fn parents_precede_children() {
        let validators = Validators::new_test(vec![1; 4]);
        let mut generator = DagGenerator::new(validators, 2, 1).unwrap();
        let events = generator.generate(200);
        let resolver = generator.resolver();
        for (i, event) in events.iter().enumerate() {
            for parent in event.parents() {
                assert!(events[..i].iter().any(|e| e.id() == *parent));
            }
            assert!(resolver(&event.id()).is_some());
            if event.seq() > 1 {
                let self_parent = resolver(&event.self_parent().unwrap()).unwrap();
                assert_eq!(self_parent.creator(), event.creator());
                assert_eq!(self_parent.seq() + 1, event.seq());
            }
        }
    }

    #[test]
    fn too_many_cheaters_are_rejected() {
        assert!(DagGenerator::new(Validators::new_test(vec![1; 3]), 4, 1).is_err());
    }

    #[test]
    fn only_cheaters_fork() {
        let validators = Validators::new_test(vec![1; 4]);
        let mut generator = DagGenerator::new(validators, 1, 3).unwrap();
        let events = generator.generate(400);
        let cheater = generator.cheaters()[0];
        let mut seen = AHashMap::new();
        let mut forks = 0;
        for event in &events {
            if seen.insert((event.creator(), event.seq()), event.id()).is_some() {
                assert_eq!(event.creator(), cheater);
                forks += 1;
            }
        }
        assert!(forks > 0);
    }
}
