// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use eyre::eyre;

use super::{HighestBefore, HighestBeforeTime, Index};
use crate::{store::Store, types::EventHash, vecengine::HighestBeforeVector};

impl Index {
    /// Creation times of the highest events observed by `id`. Served from the
    /// cache, then from the store; rebuilt from the parents when missing in
    /// both. `None` if the event was never indexed.
    pub fn get_highest_before_time(&self, id: &EventHash) -> Option<HighestBeforeTime> {
        if let Some(time) = self.lookup_highest_before_time(id) {
            return Some(time);
        }
        self.reconstruct_highest_before_time(id)
    }

    pub fn set_highest_before_time(&self, id: &EventHash, time: &HighestBeforeTime) {
        let bytes = time.to_bytes();
        {
            let table = self.highest_before_time_table.read();
            let table = table.as_ref().expect("Vector clock index used before reset");
            if let Err(e) = table.put(id.as_bytes(), &bytes) {
                let e = eyre::Report::new(e).wrap_err(format!("failed to write time of {id}"));
                (self.crit)(e);
            }
        }
        self.highest_before_time_cache
            .lock()
            .add(*id, time.clone(), bytes.len());
    }

    /// Cache, then table.
    fn lookup_highest_before_time(&self, id: &EventHash) -> Option<HighestBeforeTime> {
        if let Some(time) = self.highest_before_time_cache.lock().get(id) {
            if let Some(metrics) = &self.metrics {
                metrics.highest_before_time_cache_hits_total.inc();
            }
            return Some(time.clone());
        }
        if let Some(metrics) = &self.metrics {
            metrics.highest_before_time_cache_misses_total.inc();
        }

        let bytes = {
            let table = self.highest_before_time_table.read();
            let table = table.as_ref().expect("Vector clock index used before reset");
            match table.get(id.as_bytes()) {
                Ok(bytes) => bytes?,
                Err(e) => {
                    let e = eyre::Report::new(e).wrap_err(format!("failed to read time of {id}"));
                    (self.crit)(e);
                    return None;
                }
            }
        };
        match HighestBeforeTime::from_bytes(&bytes) {
            Ok(time) => {
                self.highest_before_time_cache
                    .lock()
                    .add(*id, time.clone(), bytes.len());
                Some(time)
            }
            Err(e) => {
                (self.crit)(e.wrap_err(format!("corrupted time of {id}")));
                None
            }
        }
    }

    /// Replays the collection of the highest-before vector of `id` from the
    /// stored sequence vectors, rebuilding missing parent times first.
    fn reconstruct_highest_before_time(&self, id: &EventHash) -> Option<HighestBeforeTime> {
        // Never indexed
        self.base.get_highest_before_seq(id)?;

        let mut stack = vec![(*id, false)];
        while let Some((current, parents_ready)) = stack.pop() {
            let Some(event) = self.engine().get_event(&current) else {
                (self.crit)(eyre!("event {current} not found"));
                return None;
            };
            if !parents_ready {
                stack.push((current, true));
                for parent in event.parents() {
                    if self.lookup_highest_before_time(parent).is_none() {
                        stack.push((*parent, false));
                    }
                }
                continue;
            }
            if self.lookup_highest_before_time(&current).is_some() {
                // Rebuilt already, the event is shared by several descendants
                continue;
            }

            let Some(seq) = self.base.get_highest_before_seq(&current) else {
                (self.crit)(eyre!("highest-before of {current} not found"));
                return None;
            };
            let branches = seq.len();
            let mut replay = HighestBefore::new(branches);
            replay.init_with_event(self.engine().event_branch_id(&current), event.as_ref());
            for parent in event.parents() {
                let Some(parent) = self.get_highest_before(parent) else {
                    (self.crit)(eyre!("highest-before of parent {parent} not found"));
                    return None;
                };
                replay.collect_from(&parent, branches);
            }
            // Forks detected while indexing the event carry no time
            for (branch, slot) in seq.iter().enumerate() {
                if slot.is_fork_detected() {
                    replay.time.set(branch as u32, 0);
                }
            }

            tracing::warn!("Reconstructed highest-before time of {current}");
            if let Some(metrics) = &self.metrics {
                metrics.highest_before_time_reconstructed_total.inc();
            }
            self.set_highest_before_time(&current, &replay.time);
        }
        self.lookup_highest_before_time(id)
    }
}
