//! Postgres-backed event store.

use async_trait::async_trait;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query, query_as, query_scalar,
};

use crate::application::ports::{EventStore, StoreError};
use crate::domain::{InvalidationEvent, OffsetRecord};

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    seq: Option<i64>,
    data: String,
}

impl From<EventRow> for InvalidationEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            seq: row.seq,
            data: row.data,
        }
    }
}

#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    /// All committed offsets, for the admin view.
    pub async fn list_offsets(&self) -> Result<Vec<OffsetRecord>, StoreError> {
        let rows = query_as::<_, (String, i64)>(
            "SELECT server_name, last_seq FROM invalidation_offsets ORDER BY server_name",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(server_name, last_seq)| OffsetRecord {
                server_name,
                last_seq,
            })
            .collect())
    }

    fn clamp_limit(limit: u64) -> i64 {
        limit.min(i64::MAX as u64) as i64
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn get_last_events(&self, limit: u64) -> Result<Vec<InvalidationEvent>, StoreError> {
        let mut rows = query_as::<_, EventRow>(
            "SELECT id, seq, data FROM invalidation_events \
             WHERE seq IS NOT NULL ORDER BY seq DESC LIMIT $1",
        )
        .bind(Self::clamp_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.reverse();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_unprocessed_events(
        &self,
        limit: u64,
    ) -> Result<Vec<InvalidationEvent>, StoreError> {
        let rows = query_as::<_, EventRow>(
            "SELECT id, seq, data FROM invalidation_events \
             WHERE seq IS NULL ORDER BY id LIMIT $1",
        )
        .bind(Self::clamp_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_events_from(
        &self,
        from_seq: i64,
        limit: u64,
    ) -> Result<Vec<InvalidationEvent>, StoreError> {
        let rows = query_as::<_, EventRow>(
            "SELECT id, seq, data FROM invalidation_events \
             WHERE seq >= $1 ORDER BY seq LIMIT $2",
        )
        .bind(from_seq)
        .bind(Self::clamp_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_sequences(&self, events: &[InvalidationEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        // Compare-and-set on `seq`: the update only touches rows whose
        // stored seq is still null, so a concurrent assignment shrinks
        // the affected-row count and the whole pass is rejected.
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE invalidation_events AS e SET seq = v.seq FROM (");
        qb.push_values(events, |mut row, event| {
            row.push_bind(event.id).push_bind(event.seq);
        });
        qb.push(") AS v(id, seq) WHERE e.id = v.id AND e.seq IS NULL");

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() != events.len() as u64 {
            return Err(StoreError::SequenceConflict);
        }
        Ok(())
    }

    async fn get_min_sequence(&self) -> Result<Option<i64>, StoreError> {
        query_scalar::<_, Option<i64>>("SELECT MIN(seq) FROM invalidation_events")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn delete_events_before(&self, before_seq: i64) -> Result<(), StoreError> {
        // Resolve the cutoff seq to an id so the delete walks the
        // primary key. Rows still awaiting sequencing are left alone.
        let cutoff_id = query_scalar::<_, i64>(
            "SELECT id FROM invalidation_events WHERE seq = $1",
        )
        .bind(before_seq)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let Some(cutoff_id) = cutoff_id else {
            return Ok(());
        };

        query("DELETE FROM invalidation_events WHERE id < $1 AND seq IS NOT NULL")
            .bind(cutoff_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_last_sequence(&self, server_name: &str) -> Result<Option<i64>, StoreError> {
        query_scalar::<_, i64>("SELECT last_seq FROM invalidation_offsets WHERE server_name = $1")
            .bind(server_name)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn set_last_sequence(&self, server_name: &str, seq: i64) -> Result<(), StoreError> {
        query(
            "INSERT INTO invalidation_offsets (server_name, last_seq) VALUES ($1, $2) \
             ON CONFLICT (server_name) DO UPDATE SET last_seq = EXCLUDED.last_seq",
        )
        .bind(server_name)
        .bind(seq)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            StoreError::Timeout
        }
        other => StoreError::from_persistence(other),
    }
}
