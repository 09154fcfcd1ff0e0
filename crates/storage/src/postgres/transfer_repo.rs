//! Transfer repository implementation for PostgreSQL.
//!
//! Covers all four transfer-shaped record kinds: native token transfers,
//! both bridge directions, and upward messages. The [`BridgeAsset`] enum is
//! flattened into nullable columns; the `kind` column decides which are
//! populated.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use pulpo_core::error::{StorageError, StorageResult};
use pulpo_core::models::{
    AppchainToNearTransfer, BridgeAsset, NearToAppchainTransfer, SystemTokenTransfer,
    UpwardMessage,
};
use pulpo_core::ports::TransferRepository;

/// PostgreSQL implementation of TransferRepository.
pub struct PgTransferRepository {
    pool: PgPool,
}

impl PgTransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Nullable column set for one [`BridgeAsset`].
struct AssetColumns {
    asset_id: Option<i64>,
    amount: Option<String>,
    collection: Option<String>,
    item: Option<String>,
}

fn asset_columns(asset: &BridgeAsset) -> AssetColumns {
    match asset {
        BridgeAsset::Fungible { amount } => AssetColumns {
            asset_id: None,
            amount: Some(amount.to_string()),
            collection: None,
            item: None,
        },
        BridgeAsset::Nep141 { asset_id, amount } => AssetColumns {
            asset_id: Some(*asset_id as i64),
            amount: Some(amount.to_string()),
            collection: None,
            item: None,
        },
        BridgeAsset::Nonfungible { collection, item } => AssetColumns {
            asset_id: None,
            amount: None,
            collection: Some(collection.to_string()),
            item: Some(item.to_string()),
        },
    }
}

pub(crate) async fn insert_system_token_transfers(
    conn: &mut PgConnection,
    transfers: &[SystemTokenTransfer],
) -> StorageResult<()> {
    for t in transfers {
        sqlx::query(
            r#"
            INSERT INTO system_token_transfers (
                id, from_account, to_account, amount, timestamp, extrinsic_id
            )
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                from_account = EXCLUDED.from_account,
                to_account = EXCLUDED.to_account,
                amount = EXCLUDED.amount,
                timestamp = EXCLUDED.timestamp,
                extrinsic_id = EXCLUDED.extrinsic_id
            "#,
        )
        .bind(&t.id)
        .bind(&t.from)
        .bind(&t.to)
        .bind(t.amount.to_string())
        .bind(t.timestamp)
        .bind(&t.extrinsic_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

pub(crate) async fn insert_appchain_to_near_transfers(
    conn: &mut PgConnection,
    transfers: &[AppchainToNearTransfer],
) -> StorageResult<()> {
    for t in transfers {
        let asset = asset_columns(&t.asset);
        // The conflict arm only fires for a replay of the same extrinsic;
        // a different event reusing a sequence must not overwrite the
        // stored transfer.
        let result = sqlx::query(
            r#"
            INSERT INTO appchain_to_near_transfers (
                id, sender, receiver, kind, asset_id, amount,
                collection, item, sequence, timestamp, extrinsic_id
            )
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8::NUMERIC, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                sender = EXCLUDED.sender,
                receiver = EXCLUDED.receiver,
                kind = EXCLUDED.kind,
                asset_id = EXCLUDED.asset_id,
                amount = EXCLUDED.amount,
                collection = EXCLUDED.collection,
                item = EXCLUDED.item,
                sequence = EXCLUDED.sequence,
                timestamp = EXCLUDED.timestamp,
                extrinsic_id = EXCLUDED.extrinsic_id
            WHERE appchain_to_near_transfers.extrinsic_id = EXCLUDED.extrinsic_id
            "#,
        )
        .bind(&t.id)
        .bind(&t.sender)
        .bind(&t.receiver)
        .bind(t.kind.as_str())
        .bind(asset.asset_id)
        .bind(asset.amount)
        .bind(asset.collection)
        .bind(asset.item)
        .bind(t.sequence as i64)
        .bind(t.timestamp)
        .bind(&t.extrinsic_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ConstraintViolation(format!(
                "bridge sequence {} already recorded for another extrinsic",
                t.id
            )));
        }
    }

    Ok(())
}

pub(crate) async fn insert_near_to_appchain_transfers(
    conn: &mut PgConnection,
    transfers: &[NearToAppchainTransfer],
) -> StorageResult<()> {
    for t in transfers {
        let asset = asset_columns(&t.asset);
        let result = sqlx::query(
            r#"
            INSERT INTO near_to_appchain_transfers (
                id, sender, receiver, kind, asset_id, amount,
                collection, item, sequence, timestamp, extrinsic_id
            )
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8::NUMERIC, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                sender = EXCLUDED.sender,
                receiver = EXCLUDED.receiver,
                kind = EXCLUDED.kind,
                asset_id = EXCLUDED.asset_id,
                amount = EXCLUDED.amount,
                collection = EXCLUDED.collection,
                item = EXCLUDED.item,
                sequence = EXCLUDED.sequence,
                timestamp = EXCLUDED.timestamp,
                extrinsic_id = EXCLUDED.extrinsic_id
            WHERE near_to_appchain_transfers.extrinsic_id = EXCLUDED.extrinsic_id
            "#,
        )
        .bind(&t.id)
        .bind(&t.sender)
        .bind(&t.receiver)
        .bind(t.kind.as_str())
        .bind(asset.asset_id)
        .bind(asset.amount)
        .bind(asset.collection)
        .bind(asset.item)
        .bind(t.sequence as i64)
        .bind(t.timestamp)
        .bind(&t.extrinsic_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ConstraintViolation(format!(
                "bridge sequence {} already recorded for another extrinsic",
                t.id
            )));
        }
    }

    Ok(())
}

pub(crate) async fn insert_upward_messages(
    conn: &mut PgConnection,
    messages: &[UpwardMessage],
) -> StorageResult<()> {
    for m in messages {
        sqlx::query(
            r#"
            INSERT INTO upward_messages (id, nonce, payload, timestamp, extrinsic_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                nonce = EXCLUDED.nonce,
                payload = EXCLUDED.payload,
                timestamp = EXCLUDED.timestamp,
                extrinsic_id = EXCLUDED.extrinsic_id
            "#,
        )
        .bind(&m.id)
        .bind(m.nonce as i64)
        .bind(&m.payload)
        .bind(m.timestamp)
        .bind(&m.extrinsic_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

#[async_trait]
impl TransferRepository for PgTransferRepository {
    async fn insert_system_token_transfers(
        &self,
        transfers: &[SystemTokenTransfer],
    ) -> StorageResult<()> {
        if transfers.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_system_token_transfers(&mut conn, transfers).await
    }

    async fn insert_appchain_to_near_transfers(
        &self,
        transfers: &[AppchainToNearTransfer],
    ) -> StorageResult<()> {
        if transfers.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_appchain_to_near_transfers(&mut conn, transfers).await
    }

    async fn insert_near_to_appchain_transfers(
        &self,
        transfers: &[NearToAppchainTransfer],
    ) -> StorageResult<()> {
        if transfers.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_near_to_appchain_transfers(&mut conn, transfers).await
    }

    async fn insert_upward_messages(&self, messages: &[UpwardMessage]) -> StorageResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_upward_messages(&mut conn, messages).await
    }
}
