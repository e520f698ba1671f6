//! Storage port for durable kill counts
//!
//! Both backends (pooled networked and embedded file) implement
//! [`KillStore`]; the rest of the core only ever sees `Arc<dyn KillStore>`.

use crate::config::BackendKind;
use crate::{Result, TallyError};
use async_trait::async_trait;
use killtally_types::{is_reserved_name, ActorId, ActorRecord, KillRecord, PairTally};

/// Refuse display names a placeholder row could claim
pub fn check_display_name(name: &str) -> Result<()> {
    if is_reserved_name(name) {
        return Err(TallyError::Conflict(format!(
            "actor name '{}' is reserved for an actor id",
            name
        )));
    }
    Ok(())
}

/// Durable store for actors and pairwise kill counts
///
/// Every method acquires its connection for the duration of the call only;
/// the connection is released on every exit path, including errors.
#[async_trait]
pub trait KillStore: Send + Sync {
    /// Backend behind this store, fixed for the store's lifetime
    fn backend(&self) -> BackendKind;

    /// Create the actor and kill-record relations if absent. Idempotent.
    ///
    /// Fails with `SchemaInitializationFailed` or `StorageUnavailable`.
    async fn ensure_schema(&self) -> Result<()>;

    /// Add each entry's count to its kill record, inserting missing records,
    /// in a single transaction.
    ///
    /// Either every entry is applied or none is; a failure is reported as
    /// `CommitFailed` (or `StorageUnavailable` when no connection could be
    /// obtained). Never retried internally.
    async fn commit_increments(&self, entries: &[PairTally]) -> Result<()>;

    /// Sum of persisted counts where `actor` is the killer; 0 when none
    async fn sum_by_actor(&self, actor: ActorId) -> Result<u64>;

    /// Whether any persisted actor row or kill record references `actor`
    async fn actor_exists(&self, actor: ActorId) -> Result<bool>;

    /// Insert the actor, or rename it if the id is already registered.
    ///
    /// Names that parse as an actor id fail with `Conflict`, see
    /// [`check_display_name`].
    async fn register_actor(&self, actor: ActorId, name: &str) -> Result<()>;

    async fn find_actor_by_name(&self, name: &str) -> Result<Option<ActorRecord>>;

    /// Persisted per-target records for `actor`, ordered by target id
    async fn kill_records(&self, actor: ActorId) -> Result<Vec<KillRecord>>;

    /// Release the pool or embedded connection. Idempotent.
    async fn close(&self);
}
