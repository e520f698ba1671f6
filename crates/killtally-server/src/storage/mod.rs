//! Storage backends behind the `KillStore` port
//!
//! PostgreSQL for pooled networked deployments, SQLite for embedded ones.
//! The backend is picked once from configuration at startup.

pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use killtally_core::{
    ActorId, ActorRecord, BackendKind, KillRecord, KillStore, PairKey, PairTally, StorageConfig,
    TallyError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Rows per multi-row statement, well below the bind limit of either backend
pub(crate) const BATCH_ROWS: usize = 500;

/// Open the configured backend. Fails with `UnsupportedBackend` for an
/// unknown kind and `StorageUnavailable` when it cannot be reached.
pub async fn connect(
    config: &StorageConfig,
    data_dir: &Path,
) -> Result<Arc<dyn KillStore>, TallyError> {
    let backend = config.backend()?;
    info!("Using {} storage backend", backend);

    let store: Arc<dyn KillStore> = match backend {
        BackendKind::Postgres => Arc::new(PostgresStore::connect(&config.postgres).await?),
        BackendKind::Sqlite => Arc::new(SqliteStore::open(&config.sqlite, data_dir).await?),
    };
    Ok(store)
}

fn is_connectivity(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed
    )
}

/// Any failure to reach the backend or run a read
pub(crate) fn unavailable(e: sqlx::Error) -> TallyError {
    TallyError::StorageUnavailable(e.to_string())
}

pub(crate) fn commit_failed(e: sqlx::Error) -> TallyError {
    if is_connectivity(&e) {
        unavailable(e)
    } else {
        TallyError::CommitFailed(e.to_string())
    }
}

pub(crate) fn schema_failed(e: sqlx::Error) -> TallyError {
    if is_connectivity(&e) {
        unavailable(e)
    } else {
        TallyError::SchemaInitializationFailed(e.to_string())
    }
}

pub(crate) fn register_failed(e: sqlx::Error, name: &str) -> TallyError {
    let taken = e
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    if taken {
        TallyError::Conflict(format!("actor name '{}' is already taken", name))
    } else {
        unavailable(e)
    }
}

/// Merge duplicate pairs and order by key.
///
/// Each row is then touched once per statement and row locks are always
/// taken in the same order. Zero counts are dropped.
pub(crate) fn coalesce(entries: &[PairTally]) -> Result<Vec<(PairKey, i64)>, TallyError> {
    let mut merged: BTreeMap<PairKey, u64> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.count > 0) {
        let count = merged.entry(entry.key()).or_insert(0);
        *count = count.saturating_add(entry.count);
    }

    merged
        .into_iter()
        .map(|(key, count)| {
            i64::try_from(count)
                .map(|count| (key, count))
                .map_err(|_| {
                    TallyError::CommitFailed(format!(
                        "count {} for {} -> {} does not fit a BIGINT",
                        count, key.actor, key.target
                    ))
                })
        })
        .collect()
}

/// Every actor named by a row, killer or target, deduplicated and ordered
pub(crate) fn referenced_actors(rows: &[(PairKey, i64)]) -> Vec<ActorId> {
    rows.iter()
        .flat_map(|(key, _)| [key.actor, key.target])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn parse_id(text: &str) -> Result<ActorId, TallyError> {
    text.parse().map_err(|e| {
        TallyError::StorageUnavailable(format!("stored actor id '{}' is not a UUID: {}", text, e))
    })
}

/// Negative sums cannot be written through this crate; clamp just in case
pub(crate) fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ActorRow {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActorRow> for ActorRecord {
    type Error = TallyError;

    fn try_from(row: ActorRow) -> Result<Self, Self::Error> {
        Ok(ActorRecord {
            id: parse_id(&row.id)?,
            name: row.name,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct KillRow {
    actor_id: String,
    target_id: String,
    count: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<KillRow> for KillRecord {
    type Error = TallyError;

    fn try_from(row: KillRow) -> Result<Self, Self::Error> {
        Ok(KillRecord {
            actor: parse_id(&row.actor_id)?,
            target: parse_id(&row.target_id)?,
            count: to_count(row.count),
            updated_at: row.updated_at,
        })
    }
}
