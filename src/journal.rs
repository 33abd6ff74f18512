//! Event journal for the reporting consumer
//!
//! Process-local, per-record transition history. Records are kept sorted by
//! timestamp so a late-arriving entry still lands in order. Not durable: the
//! request store only keeps current state.

use dashmap::DashMap;

use crate::model::{ChangeEvent, RequestId, TransitionRecord};

#[derive(Default)]
pub struct EventJournal {
    records: DashMap<RequestId, Vec<TransitionRecord>>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change if it moved status; duplicates are ignored.
    /// Returns true when a record was added.
    pub fn record(&self, event: &ChangeEvent) -> bool {
        if !event.is_transition() {
            return false;
        }
        let entry = TransitionRecord::from(event);
        let mut history = self.records.entry(entry.record_id.clone()).or_default();
        if history.contains(&entry) {
            return false;
        }
        let at = history.partition_point(|r| r.timestamp <= entry.timestamp);
        history.insert(at, entry);
        true
    }

    /// Ordered history of one record
    pub fn for_record(&self, id: &RequestId) -> Vec<TransitionRecord> {
        self.records
            .get(id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Every record's history, ordered by timestamp within each record
    pub fn snapshot(&self) -> Vec<TransitionRecord> {
        let mut all: Vec<TransitionRecord> = self
            .records
            .iter()
            .flat_map(|h| h.value().clone())
            .collect();
        all.sort_by(|a, b| {
            a.record_id
                .cmp(&b.record_id)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        all
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
