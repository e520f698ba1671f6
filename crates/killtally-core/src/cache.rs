//! In-memory write-back buffer of pending kill tallies
//!
//! One mutex guards the whole buffer. `drain` swaps the map for an empty one
//! while holding it, so every `add` lands either in the drained snapshot or
//! in the fresh buffer, never both and never neither.
//!
//! The flush gate is separate from that mutex and never taken by `add`. A
//! flush holds it exclusively from drain until its commit resolves; reads
//! that combine pending and persisted counts hold it shared, so a tally is
//! never seen both in the buffer and in storage.

use killtally_types::{ActorId, PairKey, PairTally};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct AggregationCache {
    tallies: Mutex<HashMap<PairKey, u64>>,
    flush_gate: RwLock<()>,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // still guards valid data.
    fn lock(&self) -> MutexGuard<'_, HashMap<PairKey, u64>> {
        self.tallies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn flush_gate(&self) -> &RwLock<()> {
        &self.flush_gate
    }

    /// Record one kill of `target` by `actor`
    pub fn add(&self, actor: ActorId, target: ActorId) {
        let mut tallies = self.lock();
        let count = tallies.entry(PairKey::new(actor, target)).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Take every pending tally and leave the buffer empty
    pub fn drain(&self) -> Vec<PairTally> {
        let taken = std::mem::take(&mut *self.lock());
        taken
            .into_iter()
            .map(|(key, count)| PairTally::new(key.actor, key.target, count))
            .collect()
    }

    /// Merge tallies from a failed flush back in, on top of anything added
    /// since they were drained
    pub fn restore(&self, entries: &[PairTally]) {
        let mut tallies = self.lock();
        for entry in entries.iter().filter(|e| e.count > 0) {
            let count = tallies.entry(entry.key()).or_insert(0);
            *count = count.saturating_add(entry.count);
        }
    }

    /// Pending kills credited to `actor` across all targets
    pub fn pending_sum(&self, actor: ActorId) -> u64 {
        self.lock()
            .iter()
            .filter(|(key, _)| key.actor == actor)
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn pending_for(&self, key: &PairKey) -> u64 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    /// Whether a pending tally names `actor` as killer or target
    pub fn involves(&self, actor: ActorId) -> bool {
        self.lock().keys().any(|key| key.involves(&actor))
    }

    /// Number of distinct pairs waiting for a flush
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
