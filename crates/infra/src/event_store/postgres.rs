//! Postgres-backed event store.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | `EventStoreError` |
//! |---|---|---|
//! | unique violation | `23505` | `Concurrency` (another writer took the sequence number) |
//! | check violation | `23514` | `InvalidAppend` |
//! | other database error | any | `Backend` |
//! | pool closed, IO, TLS | n/a | `Backend` |
//!
//! The [`EventStore`] trait is synchronous. Calls are bridged onto the tokio
//! runtime captured at construction, with `block_in_place` when the caller
//! is itself a runtime worker thread.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::instrument;

use keel_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, batch_stream};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id        UUID PRIMARY KEY,
    tenant_id       UUID NOT NULL,
    aggregate_id    UUID NOT NULL,
    aggregate_type  TEXT NOT NULL,
    sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT NOT NULL,
    event_version   INTEGER NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (tenant_id, aggregate_id, sequence_number)
);
CREATE INDEX IF NOT EXISTS events_tenant_idx ON events (tenant_id, aggregate_id, sequence_number);
"#;

/// Append-only store over a single `events` table.
///
/// Every query filters on `tenant_id`. Concurrent appends to one stream race
/// on the `(tenant_id, aggregate_id, sequence_number)` unique constraint, so
/// the loser gets a concurrency error even if both passed the version check.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresEventStore {
    /// Wrap an existing pool; must be called inside a tokio runtime.
    pub fn new(pool: PgPool) -> Result<Self, EventStoreError> {
        let runtime = Handle::try_current()
            .map_err(|e| EventStoreError::Backend(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            pool: Arc::new(pool),
            runtime,
        })
    }

    /// Connect, then create the schema if missing.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool)?;
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.runtime.block_on(fut))
            }
            _ => self.runtime.block_on(fut),
        }
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, aggregate_id = %aggregate_id),
        err
    )]
    pub async fn load_stream_async(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, tenant_id, aggregate_id, aggregate_type, sequence_number,
                   event_type, event_version, occurred_at, payload
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(*aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn load_tenant_async(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, tenant_id, aggregate_id, aggregate_type, sequence_number,
                   event_type, event_version, occurred_at, payload
            FROM events
            WHERE tenant_id = $1
            ORDER BY aggregate_id ASC, sequence_number ASC
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_tenant", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }

    pub async fn tenants_async(&self) -> Result<Vec<TenantId>, EventStoreError> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id FROM events ORDER BY tenant_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("tenants", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("tenant_id")
                    .map(TenantId::from_uuid)
                    .map_err(|e| map_sqlx_error("tenants", e))
            })
            .collect()
    }

    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), expected_version = ?expected_version),
        err
    )]
    pub async fn append_async(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let (tenant_id, aggregate_id, aggregate_type) = batch_stream(&events)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_type) =
            check_stream_version(&mut tx, tenant_id, aggregate_id).await?;

        if let Some(existing_type) = existing_type {
            if existing_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing_type}', attempted append with '{aggregate_type}'"
                )));
            }
        }
        if !expected_version.matches(current_version) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current_version}"
            )));
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut next_sequence = current_version + 1;
        for event in events {
            let sequence = i64::try_from(next_sequence)
                .map_err(|_| EventStoreError::InvalidAppend("sequence number overflow".into()))?;
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, tenant_id, aggregate_id, aggregate_type, sequence_number,
                    event_type, event_version, occurred_at, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id)
            .bind(*tenant_id.as_uuid())
            .bind(*aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(sequence)
            .bind(&event.event_type)
            .bind(i32::try_from(event.event_version).unwrap_or(i32::MAX))
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_event", e))?;

            committed.push(StoredEvent {
                event_id: event.event_id,
                tenant_id: event.tenant_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number: next_sequence,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
            next_sequence += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence_number), 0) AS current_version,
               MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(*tenant_id.as_uuid())
    .bind(*aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("check_stream_version", e))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    Ok((u64::try_from(current).unwrap_or(0), aggregate_type))
}

fn stored_event_from_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e| map_sqlx_error("decode_row", e);
    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(read)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(read)?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(read)?),
        aggregate_id: AggregateId::from_uuid(row.try_get("aggregate_id").map_err(read)?),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        sequence_number: u64::try_from(sequence_number).unwrap_or(0),
        event_type: row.try_get("event_type").map_err(read)?,
        event_version: u32::try_from(event_version).unwrap_or(0),
        occurred_at,
        payload: row.try_get("payload").map_err(read)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.append_async(events, expected_version))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.load_stream_async(tenant_id, aggregate_id))
    }

    fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.load_tenant_async(tenant_id))
    }

    fn tenants(&self) -> Result<Vec<TenantId>, EventStoreError> {
        self.block_on(self.tenants_async())
    }
}
