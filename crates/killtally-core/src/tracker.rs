//! The process-wide set of kill counting components
//!
//! Built in order (schema, cache, coordinator, cadence) and torn down in
//! reverse: cadence cancelled, final flush, store closed.

use crate::cache::AggregationCache;
use crate::config::FlushConfig;
use crate::flush::{FlushCoordinator, FlushOutcome, FlushState};
use crate::ports::{check_display_name, KillStore};
use crate::query::QueryService;
use crate::Result;
use killtally_types::{ActorId, KillCount};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct KillTracker {
    store: Arc<dyn KillStore>,
    cache: Arc<AggregationCache>,
    coordinator: Arc<FlushCoordinator>,
    query: QueryService,
    cancel: CancellationToken,
    cadence: Mutex<Option<JoinHandle<()>>>,
}

impl KillTracker {
    /// Initialize the schema and start the flush cadence.
    ///
    /// Any error here is fatal: the caller must not deliver events or
    /// serve queries. The store is closed before the error is returned.
    pub async fn start(store: Arc<dyn KillStore>, flush: FlushConfig) -> Result<Self> {
        flush.validate()?;

        info!("Ensuring {} schema...", store.backend());
        if let Err(e) = store.ensure_schema().await {
            store.close().await;
            return Err(e);
        }
        info!("Schema ready");

        let cache = Arc::new(AggregationCache::new());
        let coordinator = Arc::new(FlushCoordinator::new(
            cache.clone(),
            store.clone(),
            flush,
        ));
        let query = QueryService::new(cache.clone(), store.clone());

        let cancel = CancellationToken::new();
        let cadence = coordinator.clone().spawn(cancel.clone());

        Ok(Self {
            store,
            cache,
            coordinator,
            query,
            cancel,
            cadence: Mutex::new(Some(cadence)),
        })
    }

    /// Count one kill. Never waits on storage.
    pub fn record_kill(&self, actor: ActorId, target: ActorId) {
        if self.coordinator.state() == FlushState::Stopped {
            warn!("Kill {} -> {} arrived after shutdown, dropping", actor, target);
            return;
        }
        self.cache.add(actor, target);
        debug!("Recorded kill {} -> {}", actor, target);
    }

    pub async fn register_actor(&self, actor: ActorId, name: &str) -> Result<()> {
        check_display_name(name)?;
        self.store.register_actor(actor, name).await
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub async fn total_kills(&self, actor: ActorId) -> Result<u64> {
        self.query.total_kills(actor).await
    }

    pub async fn kill_count_or_pending(&self, actor: ActorId) -> KillCount {
        self.query.kill_count_or_pending(actor).await
    }

    pub async fn actor_exists(&self, actor: ActorId) -> Result<bool> {
        self.query.actor_exists(actor).await
    }

    /// Flush outside the cadence; a no-op if one is already running
    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        self.coordinator.flush().await
    }

    pub fn flush_state(&self) -> FlushState {
        self.coordinator.state()
    }

    /// Stop the cadence, run the final flush, then close the store.
    ///
    /// The store is closed even when the final flush fails; the flush
    /// result is returned for reporting.
    pub async fn shutdown(&self) -> Result<FlushOutcome> {
        info!("Shutting down kill tracker...");
        self.cancel.cancel();

        let cadence = self
            .cadence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = cadence {
            if let Err(e) = handle.await {
                warn!("Flush cadence task ended abnormally: {}", e);
            }
        }

        let result = self.coordinator.shutdown().await;
        self.store.close().await;
        info!("Kill tracker stopped");
        result
    }
}
