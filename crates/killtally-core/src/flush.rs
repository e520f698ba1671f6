//! Flush coordination between the tally cache and durable storage
//!
//! State machine: Idle -> Flushing -> Idle on every cadence tick, and
//! Idle -> ShuttingDown -> Stopped once at teardown. A single async permit
//! serializes flushes; a tick that cannot take it is a no-op.

use crate::cache::AggregationCache;
use crate::config::FlushConfig;
use crate::ports::KillStore;
use crate::{Result, TallyError};
use killtally_types::PairTally;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Flushing,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending; storage was not touched
    Empty,
    Committed { pairs: usize, kills: u64 },
    /// Another flush held the permit, or the coordinator has stopped
    Skipped,
}

pub struct FlushCoordinator {
    cache: Arc<AggregationCache>,
    store: Arc<dyn KillStore>,
    config: FlushConfig,
    permit: tokio::sync::Mutex<()>,
    state: Mutex<FlushState>,
}

fn total_kills(entries: &[PairTally]) -> u64 {
    entries.iter().map(|e| e.count).sum()
}

impl FlushCoordinator {
    pub fn new(cache: Arc<AggregationCache>, store: Arc<dyn KillStore>, config: FlushConfig) -> Self {
        Self {
            cache,
            store,
            config,
            permit: tokio::sync::Mutex::new(()),
            state: Mutex::new(FlushState::Idle),
        }
    }

    pub fn state(&self) -> FlushState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: FlushState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Flush pending tallies now, unless a flush is already running.
    ///
    /// On failure the drained tallies are merged back into the cache so the
    /// next cycle retries them; the error is returned for logging only.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let Ok(_permit) = self.permit.try_lock() else {
            debug!("Flush already in progress, skipping");
            return Ok(FlushOutcome::Skipped);
        };
        if self.state() != FlushState::Idle {
            return Ok(FlushOutcome::Skipped);
        }

        self.set_state(FlushState::Flushing);
        let result = self.drain_and_commit().await;
        self.set_state(FlushState::Idle);
        result
    }

    async fn drain_and_commit(&self) -> Result<FlushOutcome> {
        let _gate = self.cache.flush_gate().write().await;
        let drained = self.cache.drain();
        if drained.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let pairs = drained.len();
        let kills = total_kills(&drained);
        match self.store.commit_increments(&drained).await {
            Ok(()) => {
                debug!("Flushed {} kills across {} pairs", kills, pairs);
                Ok(FlushOutcome::Committed { pairs, kills })
            }
            Err(e) => {
                self.cache.restore(&drained);
                warn!(
                    "Flush failed, keeping {} kills across {} pairs for the next cycle: {}",
                    kills, pairs, e
                );
                Err(e)
            }
        }
    }

    /// Run the flush cadence until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            info!("Flush cadence started (every {:?})", self.config.interval());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush().await {
                            debug!("Cadence flush did not commit: {}", e);
                        }
                    }
                }
            }
            info!("Flush cadence stopped");
        })
    }

    /// Final synchronous flush; afterwards the coordinator is Stopped.
    ///
    /// Bounded by the configured shutdown timeout. A failure here is
    /// reported but the pending kills are not retained, since the
    /// process is going away.
    pub async fn shutdown(&self) -> Result<FlushOutcome> {
        let limit = self.config.shutdown_timeout();
        let result = match tokio::time::timeout(limit, self.final_flush()).await {
            Ok(result) => result,
            Err(_) => Err(TallyError::StorageUnavailable(format!(
                "final flush did not finish within {:?}",
                limit
            ))),
        };
        self.set_state(FlushState::Stopped);

        match &result {
            Ok(FlushOutcome::Committed { pairs, kills }) => {
                info!("Final flush committed {} kills across {} pairs", kills, pairs)
            }
            Ok(_) => debug!("Final flush had nothing to commit"),
            Err(e) => error!("Final flush failed: {}", e),
        }
        result
    }

    async fn final_flush(&self) -> Result<FlushOutcome> {
        // Waits for an in-flight cadence flush to finish first
        let _permit = self.permit.lock().await;
        if self.state() == FlushState::Stopped {
            return Ok(FlushOutcome::Skipped);
        }
        self.set_state(FlushState::ShuttingDown);

        let _gate = self.cache.flush_gate().write().await;
        let drained = self.cache.drain();
        if drained.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let pairs = drained.len();
        let kills = total_kills(&drained);
        self.store.commit_increments(&drained).await.map_err(|e| {
            error!("{} pending kills were not persisted", kills);
            e
        })?;
        Ok(FlushOutcome::Committed { pairs, kills })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;
    use killtally_types::ActorId;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn coordinator(store: Arc<FakeStore>) -> (Arc<AggregationCache>, Arc<FlushCoordinator>) {
        let cache = Arc::new(AggregationCache::new());
        let coordinator = Arc::new(FlushCoordinator::new(
            cache.clone(),
            store,
            FlushConfig::default(),
        ));
        (cache, coordinator)
    }

    #[tokio::test]
    async fn test_empty_flush_skips_backend() {
        let store = Arc::new(FakeStore::new());
        let (_cache, coordinator) = coordinator(store.clone());

        let outcome = assert_ok!(coordinator.flush().await);
        assert_eq!(outcome, FlushOutcome::Empty);
        assert_eq!(store.commit_calls(), 0);
        assert_eq!(coordinator.state(), FlushState::Idle);
    }

    #[tokio::test]
    async fn test_flush_moves_tallies_to_store() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        let a = ActorId::random();
        let b = ActorId::random();
        let c = ActorId::random();

        cache.add(a, b);
        cache.add(a, b);
        cache.add(a, c);

        let outcome = assert_ok!(coordinator.flush().await);
        assert_eq!(outcome, FlushOutcome::Committed { pairs: 2, kills: 3 });
        assert!(cache.is_empty());
        assert_eq!(store.persisted(a, b), 2);
        assert_eq!(store.persisted(a, c), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_retains_tallies_for_next_cycle() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        let a = ActorId::random();
        let b = ActorId::random();

        for _ in 0..3 {
            cache.add(a, b);
        }
        store.set_down(true);
        assert_err!(coordinator.flush().await);
        assert_eq!(coordinator.state(), FlushState::Idle);
        assert_eq!(cache.pending_sum(a), 3);
        assert_eq!(store.persisted(a, b), 0);

        // More kills arrive while storage is down
        cache.add(a, b);
        store.set_down(false);

        let outcome = assert_ok!(coordinator.flush().await);
        assert_eq!(outcome, FlushOutcome::Committed { pairs: 1, kills: 4 });
        assert_eq!(store.persisted(a, b), 4);
        assert_eq!(cache.pending_sum(a), 0);
    }

    #[tokio::test]
    async fn test_partial_write_failure_does_not_double_count_on_retry() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        let a = ActorId::random();
        let b = ActorId::random();
        let c = ActorId::random();

        for _ in 0..3 {
            cache.add(a, b);
        }
        for _ in 0..2 {
            cache.add(a, c);
        }

        // Backend writes one of two entries, then dies
        store.fail_next_commits(1, 1);
        assert_err!(coordinator.flush().await);
        assert_eq!(store.persisted(a, b), 0);
        assert_eq!(store.persisted(a, c), 0);

        assert_ok!(coordinator.flush().await);
        assert_eq!(store.persisted(a, b), 3);
        assert_eq!(store.persisted(a, c), 2);
        assert_eq!(store.commit_calls(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_flush_is_noop() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        cache.add(ActorId::random(), ActorId::random());

        let held = coordinator.permit.try_lock().unwrap();
        let outcome = assert_ok!(coordinator.flush().await);
        assert_eq!(outcome, FlushOutcome::Skipped);
        assert_eq!(store.commit_calls(), 0);
        assert_eq!(cache.len(), 1);
        drop(held);

        assert_ok!(coordinator.flush().await);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_then_stops() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        let a = ActorId::random();
        let b = ActorId::random();
        cache.add(a, b);

        let outcome = assert_ok!(coordinator.shutdown().await);
        assert_eq!(outcome, FlushOutcome::Committed { pairs: 1, kills: 1 });
        assert_eq!(coordinator.state(), FlushState::Stopped);
        assert_eq!(store.persisted(a, b), 1);

        // Stopped coordinators never flush again
        cache.add(a, b);
        assert_eq!(assert_ok!(coordinator.flush().await), FlushOutcome::Skipped);
        assert_eq!(assert_ok!(coordinator.shutdown().await), FlushOutcome::Skipped);
        assert_eq!(store.persisted(a, b), 1);
    }

    #[tokio::test]
    async fn test_shutdown_surfaces_final_flush_failure() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        cache.add(ActorId::random(), ActorId::random());
        store.set_down(true);

        let err = coordinator.shutdown().await.unwrap_err();
        assert!(matches!(err, TallyError::StorageUnavailable(_)));
        assert_eq!(coordinator.state(), FlushState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_flushes_periodically() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        let a = ActorId::random();
        let b = ActorId::random();
        let cancel = CancellationToken::new();
        let handle = coordinator.clone().spawn(cancel.clone());

        cache.add(a, b);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.persisted(a, b), 1);
        assert!(cache.is_empty());

        cache.add(a, b);
        cache.add(a, b);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.persisted(a, b), 3);

        cancel.cancel();
        assert_ok!(handle.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_retains_kills_while_backend_down() {
        let store = Arc::new(FakeStore::new());
        let (cache, coordinator) = coordinator(store.clone());
        let a = ActorId::random();
        let b = ActorId::random();
        let cancel = CancellationToken::new();
        let handle = coordinator.clone().spawn(cancel.clone());

        store.set_down(true);
        cache.add(a, b);
        cache.add(a, b);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.commit_calls(), 1);
        assert_eq!(store.persisted(a, b), 0);
        assert_eq!(cache.pending_sum(a), 2);
        assert_eq!(coordinator.state(), FlushState::Idle);

        cache.add(a, b);
        store.set_down(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.persisted(a, b), 3);
        assert!(cache.is_empty());

        cancel.cancel();
        assert_ok!(handle.await);
    }
}
