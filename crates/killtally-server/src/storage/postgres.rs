//! PostgreSQL backend over a bounded connection pool

use super::schema::{self, INSERT_ACTORS_SUFFIX, UPSERT_KILLS_SUFFIX};
use super::{
    coalesce, commit_failed, referenced_actors, register_failed, schema_failed, to_count,
    unavailable, ActorRow, KillRow, BATCH_ROWS,
};
use async_trait::async_trait;
use killtally_core::{
    check_display_name, placeholder_name, ActorId, ActorRecord, BackendKind, KillRecord,
    KillStore, PairTally, PostgresConfig, Result,
};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Build the pool and open `minimum_idle` connections up front
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Connecting to PostgreSQL at {}:{}/{} as {} (pool size {})",
            config.host, config.port, config.database, config.user, config.pool_size
        );

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .options([("statement_timeout", config.statement_timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(config.minimum_idle)
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .acquire_timeout(config.connection_timeout())
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        info!("PostgreSQL pool ready");
        Ok(Self { pool })
    }

    /// Scoped connection, handed back to the pool when dropped
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(unavailable)
    }
}

#[async_trait]
impl KillStore for PostgresStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        for statement in schema::postgres_statements() {
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
            let mut query = QueryBuilder::<Postgres>::new("INSERT INTO actors (id, name) ");
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
            let mut query = QueryBuilder::<Postgres>::new(
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

        // Dropping the transaction without commit rolls it back
        tx.commit().await.map_err(commit_failed)?;
        debug!("Committed {} kill records", rows.len());
        Ok(())
    }

    async fn sum_by_actor(&self, actor: ActorId) -> Result<u64> {
        let mut conn = self.acquire().await?;
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(count), 0)::BIGINT FROM kill_records WHERE actor_id = $1",
        )
        .bind(actor.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(unavailable)?;
        Ok(to_count(sum))
    }

    async fn actor_exists(&self, actor: ActorId) -> Result<bool> {
        let mut conn = self.acquire().await?;
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM actors WHERE id = $1) \
             OR EXISTS (SELECT 1 FROM kill_records WHERE actor_id = $1 OR target_id = $1)",
        )
        .bind(actor.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(unavailable)
    }

    async fn register_actor(&self, actor: ActorId, name: &str) -> Result<()> {
        check_display_name(name)?;
        let mut conn = self.acquire().await?;
        sqlx::query(
            "INSERT INTO actors (id, name) VALUES ($1, $2) \
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
            sqlx::query_as("SELECT id, name, created_at FROM actors WHERE name = $1")
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
             WHERE actor_id = $1 ORDER BY target_id",
        )
        .bind(actor.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(unavailable)?;
        rows.into_iter().map(KillRecord::try_from).collect()
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            info!("Closing PostgreSQL pool");
        }
        self.pool.close().await;
    }
}
