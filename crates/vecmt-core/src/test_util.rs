// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    types::{Crit, DagEvent, Event, EventHash, GetEvent, Seq, Timestamp, ValidatorId},
    validators::Validators,
};

pub fn test_crit() -> Crit {
    Arc::new(|e: eyre::Report| panic!("Critical error: {e:?}"))
}

/// Small DAG described as text, validators named by letters.
///
/// Events are separated by `;` or new lines: `a2@40:[b1,c1]` is the second
/// event of validator `a` (id 1) created at 40 with parents `a1`, `b1` and
/// `c1`. The self-parent is added implicitly. Trailing `'` mark forks:
/// `a2'` is another event at seq 2 of `a`, its self-parent is `a1'` if it
/// exists and `a1` otherwise. The creation time defaults to the seq.
pub struct Dag {
    validators: Arc<Validators>,
    events: Vec<Arc<Event>>,
    by_name: AHashMap<String, Arc<Event>>,
}

impl Dag {
    pub fn draw(validators: usize, text: &str) -> Self {
        let mut dag = Self {
            validators: Validators::new_test(vec![1; validators]),
            events: Vec::new(),
            by_name: AHashMap::new(),
        };
        text.split([';', '\n'])
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .for_each(|entry| dag.draw_event(entry));
        dag
    }

    fn draw_event(&mut self, entry: &str) {
        let (head, parents) = match entry.split_once(':') {
            Some((head, parents)) => (head.trim(), parents.trim()),
            None => (entry, ""),
        };
        let (name, time) = match head.split_once('@') {
            Some((name, time)) => (name.trim(), Some(time.trim().parse().expect("Bad time"))),
            None => (head, None),
        };
        let letter = &name[..1];
        let creator = (letter.as_bytes()[0] - b'a') as ValidatorId + 1;
        let forks = name.matches('\'').count();
        let seq: Seq = name[1..].trim_end_matches('\'').parse().expect("Bad seq");

        let mut parent_ids = Vec::new();
        if seq > 1 {
            let fork_parent = format!("{letter}{}{}", seq - 1, "'".repeat(forks));
            let self_parent = self
                .by_name
                .get(&fork_parent)
                .or_else(|| self.by_name.get(&format!("{letter}{}", seq - 1)))
                .unwrap_or_else(|| panic!("Self-parent of {name} not drawn"));
            parent_ids.push(self_parent.id());
        }
        for parent in parents
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let id = self.id(parent);
            if !parent_ids.contains(&id) {
                parent_ids.push(id);
            }
        }

        let payload = if forks > 0 { vec![forks as u8] } else { vec![] };
        let time: Timestamp = time.unwrap_or(seq as Timestamp);
        let event = Arc::new(Event::new_with_payload(creator, seq, parent_ids, time, payload));
        self.events.push(event.clone());
        assert!(
            self.by_name.insert(name.to_string(), event).is_none(),
            "Event {name} drawn twice"
        );
    }

    pub fn validators(&self) -> Arc<Validators> {
        self.validators.clone()
    }

    pub fn get(&self, name: &str) -> Arc<Event> {
        self.by_name
            .get(name)
            .unwrap_or_else(|| panic!("Event {name} not drawn"))
            .clone()
    }

    pub fn id(&self, name: &str) -> EventHash {
        self.get(name).id()
    }

    /// Events in the order they were drawn, parents first.
    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    pub fn resolver(&self) -> GetEvent {
        resolver(&self.events)
    }

    pub fn add_all(
        &self,
        mut add: impl FnMut(&dyn DagEvent) -> eyre::Result<()>,
    ) -> eyre::Result<()> {
        for event in &self.events {
            add(event.as_ref())?;
        }
        Ok(())
    }
}

pub fn resolver(events: &[Arc<Event>]) -> GetEvent {
    let events: AHashMap<EventHash, Arc<Event>> =
        events.iter().map(|e| (e.id(), e.clone())).collect();
    Arc::new(move |id: &EventHash| -> Option<Arc<dyn DagEvent>> {
        events.get(id).map(|e| e.clone() as Arc<dyn DagEvent>)
    })
}

#[test]
fn draw_adds_self_parents() {
    let dag = Dag::draw(3, "a1; b1@7; a2:[b1]; a2'; a3':[a2]");
    assert_eq!(dag.get("b1").creation_time(), 7);
    assert_eq!(dag.get("a2").parents(), &[dag.id("a1"), dag.id("b1")]);
    assert_eq!(dag.get("a2'").parents(), &[dag.id("a1")]);
    assert_ne!(dag.id("a2"), dag.id("a2'"));
    assert_eq!(dag.get("a3'").parents(), &[dag.id("a2'"), dag.id("a2")]);
    assert_eq!(dag.get("a3'").creator(), 1);
    assert_eq!(dag.events().len(), 5);
}
