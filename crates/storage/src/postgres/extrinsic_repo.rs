//! Extrinsic and call repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use pulpo_core::error::{StorageError, StorageResult};
use pulpo_core::models::{BlockHash, Call, Extrinsic};
use pulpo_core::ports::ExtrinsicRepository;

use super::helpers::{bytes_to_hash32, numeric_to_u128};

/// PostgreSQL implementation of ExtrinsicRepository.
pub struct PgExtrinsicRepository {
    pool: PgPool,
}

impl PgExtrinsicRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_extrinsics(
    conn: &mut PgConnection,
    extrinsics: &[Extrinsic],
) -> StorageResult<()> {
    for ext in extrinsics {
        sqlx::query(
            r#"
            INSERT INTO extrinsics (
                id, block_number, block_hash, index, hash, pallet, call,
                args, signer, signature, nonce, tip, is_signed, success, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12::NUMERIC, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                args = EXCLUDED.args,
                signer = EXCLUDED.signer,
                signature = EXCLUDED.signature,
                nonce = EXCLUDED.nonce,
                tip = EXCLUDED.tip,
                is_signed = EXCLUDED.is_signed,
                success = EXCLUDED.success,
                timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(&ext.id)
        .bind(ext.block_number as i64)
        .bind(&ext.block_hash.0[..])
        .bind(ext.index as i32)
        .bind(&ext.hash)
        .bind(&ext.pallet)
        .bind(&ext.call)
        .bind(&ext.args)
        .bind(&ext.signer)
        .bind(&ext.signature)
        .bind(ext.nonce as i64)
        .bind(ext.tip.to_string())
        .bind(ext.is_signed)
        .bind(ext.success)
        .bind(ext.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

pub(crate) async fn insert_calls(conn: &mut PgConnection, calls: &[Call]) -> StorageResult<()> {
    for call in calls {
        sqlx::query(
            r#"
            INSERT INTO calls (id, extrinsic_id, index, pallet, call, args)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                pallet = EXCLUDED.pallet,
                call = EXCLUDED.call,
                args = EXCLUDED.args
            "#,
        )
        .bind(&call.id)
        .bind(&call.extrinsic_id)
        .bind(call.index as i32)
        .bind(&call.pallet)
        .bind(&call.call)
        .bind(&call.args)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

#[async_trait]
impl ExtrinsicRepository for PgExtrinsicRepository {
    async fn insert_extrinsics(&self, extrinsics: &[Extrinsic]) -> StorageResult<()> {
        if extrinsics.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_extrinsics(&mut conn, extrinsics).await
    }

    async fn insert_calls(&self, calls: &[Call]) -> StorageResult<()> {
        if calls.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_calls(&mut conn, calls).await
    }

    async fn get_extrinsic(&self, id: &str) -> StorageResult<Option<Extrinsic>> {
        let row = sqlx::query_as::<_, ExtrinsicRow>(
            r#"
            SELECT id, block_number, block_hash, index, hash, pallet, call,
                   args, signer, signature, nonce, tip::TEXT AS tip,
                   is_signed, success, timestamp
            FROM extrinsics
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(ExtrinsicRow::into_extrinsic).transpose()
    }
}

/// Database row representation for Extrinsic.
#[derive(sqlx::FromRow)]
struct ExtrinsicRow {
    id: String,
    block_number: i64,
    block_hash: Vec<u8>,
    index: i32,
    hash: String,
    pallet: String,
    call: String,
    args: serde_json::Value,
    signer: Option<String>,
    signature: Option<String>,
    nonce: i64,
    tip: String,
    is_signed: bool,
    success: bool,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl ExtrinsicRow {
    fn into_extrinsic(self) -> StorageResult<Extrinsic> {
        Ok(Extrinsic {
            id: self.id,
            block_number: self.block_number as u64,
            block_hash: BlockHash(bytes_to_hash32(self.block_hash, "extrinsic.block_hash")?),
            index: self.index as u32,
            hash: self.hash,
            pallet: self.pallet,
            call: self.call,
            args: self.args,
            signer: self.signer,
            signature: self.signature,
            nonce: self.nonce as u64,
            tip: numeric_to_u128(self.tip, "extrinsic.tip")?,
            is_signed: self.is_signed,
            success: self.success,
            timestamp: self.timestamp,
        })
    }
}
