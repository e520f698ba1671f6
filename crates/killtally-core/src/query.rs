//! Read path merging pending tallies with persisted counts

use crate::cache::AggregationCache;
use crate::ports::KillStore;
use crate::Result;
use killtally_types::{ActorId, ActorRecord, KillCount, KillRecord};
use std::sync::Arc;
use tracing::warn;

pub struct QueryService {
    cache: Arc<AggregationCache>,
    store: Arc<dyn KillStore>,
}

impl QueryService {
    pub fn new(cache: Arc<AggregationCache>, store: Arc<dyn KillStore>) -> Self {
        Self { cache, store }
    }

    /// Kills still waiting in the write-back cache
    pub fn pending_kills(&self, actor: ActorId) -> u64 {
        self.cache.pending_sum(actor)
    }

    /// Pending plus persisted kills; fails with `StorageUnavailable` when
    /// storage cannot be reached
    pub async fn total_kills(&self, actor: ActorId) -> Result<u64> {
        Ok(self.kill_count(actor).await?.total())
    }

    pub async fn kill_count(&self, actor: ActorId) -> Result<KillCount> {
        // Shared with other readers, exclusive against an in-flight flush
        let _gate = self.cache.flush_gate().read().await;
        let persisted = self.store.sum_by_actor(actor).await?;
        let pending = self.cache.pending_sum(actor);
        Ok(KillCount::Complete { pending, persisted })
    }

    /// Like [`kill_count`](Self::kill_count), but degrades to the
    /// pending-only figure instead of failing
    pub async fn kill_count_or_pending(&self, actor: ActorId) -> KillCount {
        match self.kill_count(actor).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Persisted kills for {} unavailable, reporting pending only: {}", actor, e);
                KillCount::PendingOnly {
                    pending: self.cache.pending_sum(actor),
                }
            }
        }
    }

    /// True if a pending tally or a persisted record references the actor
    pub async fn actor_exists(&self, actor: ActorId) -> Result<bool> {
        let _gate = self.cache.flush_gate().read().await;
        if self.cache.involves(actor) {
            return Ok(true);
        }
        self.store.actor_exists(actor).await
    }

    pub async fn find_actor_by_name(&self, name: &str) -> Result<Option<ActorRecord>> {
        self.store.find_actor_by_name(name).await
    }

    /// Persisted per-target breakdown; pending tallies are not included
    pub async fn kill_records(&self, actor: ActorId) -> Result<Vec<KillRecord>> {
        self.store.kill_records(actor).await
    }
}
