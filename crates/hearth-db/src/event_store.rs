//! The event queue as a `PostgreSQL` table.
//!
//! The complete [`EventRecord`] is stored as JSONB. `target`, `due_time`
//! and `periodic_type` are duplicated into indexed columns for the due
//! range scan and the periodic lookup.

use chrono::{DateTime, Utc};
use hearth_core::error::StoreError;
use hearth_events::EventStore;
use hearth_types::{EventId, EventRecord, PlayerId};
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PgStore;

const UPSERT: &str = r"INSERT INTO events (event_id, target, due_time, periodic_type, record)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (event_id) DO UPDATE SET
        target = EXCLUDED.target,
        due_time = EXCLUDED.due_time,
        periodic_type = EXCLUDED.periodic_type,
        record = EXCLUDED.record";

const INSERT: &str = r"INSERT INTO events (event_id, target, due_time, periodic_type, record)
    VALUES ($1, $2, $3, $4, $5)";

fn decode(rows: Vec<serde_json::Value>) -> Result<Vec<EventRecord>, DbError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(DbError::from))
        .collect()
}

impl PgStore {
    async fn write_event(&self, sql: &str, record: &EventRecord) -> Result<u64, DbError> {
        let result = sqlx::query(sql)
            .bind(record.event_id.into_inner())
            .bind(record.target.as_str())
            .bind(record.due_time)
            .bind(record.periodic_type.as_deref())
            .bind(serde_json::to_value(record)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl EventStore for PgStore {
    fn insert(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.block_on(async {
            match self.write_event(INSERT, record).await {
                Err(DbError::Postgres(sqlx::Error::Database(err))) if err.is_unique_violation() => {
                    Err(DbError::Store(StoreError::Backend {
                        message: format!("duplicate event id {}", record.event_id),
                    }))
                }
                other => other.map(|_rows| ()),
            }
        })
    }

    fn upsert(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.block_on(async { self.write_event(UPSERT, record).await.map(|_rows| ()) })
    }

    fn get(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
        self.block_on(async {
            let row: Option<serde_json::Value> =
                sqlx::query_scalar("SELECT record FROM events WHERE event_id = $1")
                    .bind(id.into_inner())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(serde_json::from_value).transpose()?)
        })
    }

    fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<EventRecord>, StoreError> {
        self.block_on(async {
            let rows: Vec<serde_json::Value> = sqlx::query_scalar(
                "SELECT record FROM events WHERE due_time < $1 ORDER BY due_time, event_id",
            )
            .bind(before)
            .fetch_all(&self.pool)
            .await?;
            decode(rows)
        })
    }

    fn find_periodic(
        &self,
        target: &PlayerId,
        periodic_type: &str,
    ) -> Result<Option<EventRecord>, StoreError> {
        self.block_on(async {
            let row: Option<serde_json::Value> = sqlx::query_scalar(
                r"SELECT record FROM events
                  WHERE target = $1 AND periodic_type = $2
                  ORDER BY due_time, event_id
                  LIMIT 1",
            )
            .bind(target.as_str())
            .bind(periodic_type)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(serde_json::from_value).transpose()?)
        })
    }

    fn events_for(&self, target: &PlayerId) -> Result<Vec<EventRecord>, StoreError> {
        self.block_on(async {
            let rows: Vec<serde_json::Value> = sqlx::query_scalar(
                "SELECT record FROM events WHERE target = $1 ORDER BY due_time, event_id",
            )
            .bind(target.as_str())
            .fetch_all(&self.pool)
            .await?;
            decode(rows)
        })
    }

    fn remove_events(&self, ids: &[EventId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = ids.iter().copied().map(EventId::into_inner).collect();
        self.block_on(async {
            let result = sqlx::query("DELETE FROM events WHERE event_id = ANY($1)")
                .bind(&ids)
                .execute(&self.pool)
                .await?;
            tracing::debug!(removed = result.rows_affected(), "events removed");
            Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
        })
    }
}
