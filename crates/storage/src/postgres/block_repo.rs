//! Block repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use pulpo_core::error::{StorageError, StorageResult};
use pulpo_core::models::{Block, BlockHash};
use pulpo_core::ports::BlockRepository;

use super::helpers::bytes_to_hash32;

/// PostgreSQL implementation of BlockRepository.
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Upsert one block on any executor (standalone or inside a transaction).
pub(crate) async fn insert_block(conn: &mut PgConnection, block: &Block) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO blocks (
            number, hash, parent_hash, spec_version,
            timestamp, extrinsic_count, event_count
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (number) DO UPDATE SET
            hash = EXCLUDED.hash,
            parent_hash = EXCLUDED.parent_hash,
            spec_version = EXCLUDED.spec_version,
            timestamp = EXCLUDED.timestamp,
            extrinsic_count = EXCLUDED.extrinsic_count,
            event_count = EXCLUDED.event_count
        "#,
    )
    .bind(block.number as i64)
    .bind(&block.hash.0[..])
    .bind(&block.parent_hash.0[..])
    .bind(block.spec_version as i32)
    .bind(block.timestamp)
    .bind(block.extrinsic_count as i32)
    .bind(block.event_count as i32)
    .execute(conn)
    .await
    .map_err(|e| StorageError::QueryError(e.to_string()))?;

    Ok(())
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn insert_block(&self, block: &Block) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_block(&mut conn, block).await
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT number, hash, parent_hash, spec_version,
                   timestamp, extrinsic_count, event_count
            FROM blocks
            WHERE number = $1
            "#,
        )
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(BlockRow::into_block).transpose()
    }

    async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
        // MAX returns NULL when table is empty, so we need Option<i64> in the tuple
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(number) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(row.0.map(|n| n as u64))
    }
}

/// Database row representation for Block.
#[derive(sqlx::FromRow)]
struct BlockRow {
    number: i64,
    hash: Vec<u8>,
    parent_hash: Vec<u8>,
    spec_version: i32,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    extrinsic_count: i32,
    event_count: i32,
}

impl BlockRow {
    fn into_block(self) -> StorageResult<Block> {
        Ok(Block {
            number: self.number as u64,
            hash: BlockHash(bytes_to_hash32(self.hash, "block.hash")?),
            parent_hash: BlockHash(bytes_to_hash32(self.parent_hash, "block.parent_hash")?),
            spec_version: self.spec_version as u32,
            timestamp: self.timestamp,
            extrinsic_count: self.extrinsic_count as u32,
            event_count: self.event_count as u32,
        })
    }
}
