// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use eyre::eyre;

use super::Index;
use crate::types::{EventHash, Stake, Timestamp, ValidatorIndex};

struct MedianTimeIndex {
    stake: Stake,
    claimed_time: Timestamp,
}

impl Index {
    /// Stake-weighted median of the creation times of the highest events
    /// observed by `id`, one per validator. Cheaters don't take part, and
    /// validators without observed events count with `default_time`.
    pub fn median_time(&self, id: &EventHash, default_time: Timestamp) -> Timestamp {
        let Some(before) = self.get_merged_highest_before(id) else {
            (self.crit)(eyre!("event={id} not found"));
            return default_time;
        };
        let validators = self.engine().validators();

        // Not the total stake, cheaters don't count
        let mut honest_total_stake: Stake = 0;
        let mut highests: Vec<MedianTimeIndex> = (0..validators.len() as ValidatorIndex)
            .map(|idx| {
                let (seq, time) = before.get(idx);
                let mut highest = MedianTimeIndex {
                    stake: validators.get_stake_by_idx(idx),
                    claimed_time: time,
                };
                if seq.is_fork_detected() {
                    highest.stake = 0;
                } else if seq.seq == 0 {
                    highest.claimed_time = default_time;
                }
                honest_total_stake += highest.stake;
                highest
            })
            .collect();

        highests.sort_by_key(|highest| highest.claimed_time);

        let half_stake = honest_total_stake / 2;
        let mut current_stake: Stake = 0;
        let mut median: Timestamp = 0;
        for highest in &highests {
            current_stake += highest.stake;
            if current_stake >= half_stake {
                median = highest.claimed_time;
                break;
            }
        }

        if current_stake < half_stake || current_stake > honest_total_stake {
            (self.crit)(eyre!(
                "median wasn't calculated correctly, median={median}, current_stake={current_stake}, total_stake={honest_total_stake}, validators={}, id={id}",
                highests.len()
            ));
        }
        median
    }
}
