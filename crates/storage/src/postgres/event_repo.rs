//! Event repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use pulpo_core::error::{StorageError, StorageResult};
use pulpo_core::models::{BlockHash, Event};
use pulpo_core::ports::EventRepository;

use super::helpers::bytes_to_hash32;

/// PostgreSQL implementation of EventRepository.
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_events(conn: &mut PgConnection, events: &[Event]) -> StorageResult<()> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, block_number, block_hash, index, extrinsic_id, pallet, name, data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                extrinsic_id = EXCLUDED.extrinsic_id,
                pallet = EXCLUDED.pallet,
                name = EXCLUDED.name,
                data = EXCLUDED.data
            "#,
        )
        .bind(&event.id)
        .bind(event.block_number as i64)
        .bind(&event.block_hash.0[..])
        .bind(event.index as i32)
        .bind(&event.extrinsic_id)
        .bind(&event.pallet)
        .bind(&event.name)
        .bind(&event.data)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn insert_events(&self, events: &[Event]) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_events(&mut conn, events).await
    }

    async fn get_event(&self, id: &str) -> StorageResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, block_number, block_hash, index, extrinsic_id, pallet, name, data
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(EventRow::into_event).transpose()
    }
}

/// Database row representation for Event.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    block_number: i64,
    block_hash: Vec<u8>,
    index: i32,
    extrinsic_id: String,
    pallet: String,
    name: String,
    data: serde_json::Value,
}

impl EventRow {
    fn into_event(self) -> StorageResult<Event> {
        Ok(Event {
            id: self.id,
            block_number: self.block_number as u64,
            block_hash: BlockHash(bytes_to_hash32(self.block_hash, "event.block_hash")?),
            index: self.index as u32,
            extrinsic_id: self.extrinsic_id,
            pallet: self.pallet,
            name: self.name,
            data: self.data,
        })
    }
}
