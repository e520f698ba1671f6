//! Embedded SQLite backend
//!
//! One long-lived connection serializes every statement; WAL journaling and
//! a busy timeout cover other processes touching the same file.

use super::schema::{self, INSERT_ACTORS_SUFFIX, UPSERT_KILLS_SUFFIX};
use super::{
    coalesce, commit_failed, referenced_actors, register_failed, schema_failed, to_count,
    unavailable, ActorRow, KillRow, BATCH_ROWS,
};
use async_trait::async_trait;
use killtally_core::{
    check_display_name, placeholder_name, ActorId, ActorRecord, BackendKind, KillRecord,
    KillStore, PairTally, Result, SqliteConfig, TallyError,
};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Connection, QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file under `data_dir`
    pub async fn open(config: &SqliteConfig, data_dir: &Path) -> Result<Self> {
        let options = if config.is_in_memory() {
            info!("Opening in-memory SQLite database");
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(unavailable)?
        } else {
            let path = config.resolve_path(data_dir);
            info!("Opening SQLite database at: {}", path.display());

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    TallyError::StorageUnavailable(format!(
                        "failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }

            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        let options = options
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .acquire_timeout(config.connection_timeout())
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        info!("SQLite database ready");
        Ok(Self { pool })
    }

    /// Scoped handle on the single connection; other callers wait until it
    /// is dropped
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(unavailable)
    }
}

#[async_trait]
impl KillStore for SqliteStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        for statement in schema::sqlite_statements() {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(schema_failed)?;
        }
        Ok(())
    }

    async fn commit_increments(&self, entries: &[PairTally]) -> Result<()> {
        let rows = coalesce(entries)?;
        if rows.is_empty() {
            return Ok(());
        }
        let actors = referenced_actors(&rows);

        let mut conn = self.acquire().await?;
        let mut tx = conn.begin().await.map_err(commit_failed)?;

        for chunk in actors.chunks(BATCH_ROWS) {
            let mut query = QueryBuilder::<Sqlite>::new("INSERT INTO actors (id, name) ");
            query.push_values(chunk, |mut row, id| {
                row.push_bind(id.to_string()).push_bind(placeholder_name(id));
            });
            query.push(INSERT_ACTORS_SUFFIX);
            query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(commit_failed)?;
        }

        for chunk in rows.chunks(BATCH_ROWS) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "INSERT INTO kill_records (actor_id, target_id, count) ",
            );
            query.push_values(chunk, |mut row, (key, count)| {
                row.push_bind(key.actor.to_string())
                    .push_bind(key.target.to_string())
                    .push_bind(*count);
            });
            query.push(UPSERT_KILLS_SUFFIX);
            query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(commit_failed)?;
        }

        tx.commit().await.map_err(commit_failed)?;
        debug!("Committed {} kill records", rows.len());
        Ok(())
    }

    async fn sum_by_actor(&self, actor: ActorId) -> Result<u64> {
        let mut conn = self.acquire().await?;
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(count), 0) FROM kill_records WHERE actor_id = ?1",
        )
        .bind(actor.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(unavailable)?;
        Ok(to_count(sum))
    }

    async fn actor_exists(&self, actor: ActorId) -> Result<bool> {
        let mut conn = self.acquire().await?;
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM actors WHERE id = ?1) \
             OR EXISTS (SELECT 1 FROM kill_records WHERE actor_id = ?1 OR target_id = ?1)",
        )
        .bind(actor.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(unavailable)?;
        Ok(found != 0)
    }

    async fn register_actor(&self, actor: ActorId, name: &str) -> Result<()> {
        check_display_name(name)?;
        let mut conn = self.acquire().await?;
        sqlx::query(
            "INSERT INTO actors (id, name) VALUES (?1, ?2) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name",
        )
        .bind(actor.to_string())
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(|e| register_failed(e, name))?;
        Ok(())
    }

    async fn find_actor_by_name(&self, name: &str) -> Result<Option<ActorRecord>> {
        let mut conn = self.acquire().await?;
        let row: Option<ActorRow> =
            sqlx::query_as("SELECT id, name, created_at FROM actors WHERE name = ?1")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await
                .map_err(unavailable)?;
        row.map(ActorRecord::try_from).transpose()
    }

    async fn kill_records(&self, actor: ActorId) -> Result<Vec<KillRecord>> {
        let mut conn = self.acquire().await?;
        let rows: Vec<KillRow> = sqlx::query_as(
            "SELECT actor_id, target_id, count, updated_at FROM kill_records \
             WHERE actor_id = ?1 ORDER BY target_id",
        )
        .bind(actor.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(unavailable)?;
        rows.into_iter().map(KillRecord::try_from).collect()
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            info!("Closing SQLite database");
        }
        self.pool.close().await;
    }
}
