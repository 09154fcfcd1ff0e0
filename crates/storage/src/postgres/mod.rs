//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `pulpo-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgBlockRepository`, `PgExtrinsicRepository`, etc.
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod account_repo;
mod block_repo;
mod cursor_repo;
mod database;
mod event_repo;
mod extrinsic_repo;
mod helpers;
mod transfer_repo;

pub use account_repo::PgAccountRepository;
pub use block_repo::PgBlockRepository;
pub use cursor_repo::PgCursorRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use event_repo::PgEventRepository;
pub use extrinsic_repo::PgExtrinsicRepository;
pub use transfer_repo::PgTransferRepository;

use std::sync::Arc;

use async_trait::async_trait;

use pulpo_core::error::{StorageError, StorageResult};
use pulpo_core::ports::{
    AccountRepository, BlockRecords, BlockRepository, CursorRepository, EventRepository,
    ExtrinsicRepository, Repositories, TransferRepository,
};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations and
/// implements the atomic batch write that spans every dependent table of
/// one block.
pub struct PgRepositories {
    db: Arc<Database>,
    blocks: PgBlockRepository,
    extrinsics: PgExtrinsicRepository,
    events: PgEventRepository,
    transfers: PgTransferRepository,
    accounts: PgAccountRepository,
    cursor: PgCursorRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        let pool = db.pool().clone();
        Self {
            blocks: PgBlockRepository::new(pool.clone()),
            extrinsics: PgExtrinsicRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            transfers: PgTransferRepository::new(pool.clone()),
            accounts: PgAccountRepository::new(pool.clone()),
            cursor: PgCursorRepository::new(pool),
            db,
        }
    }
}

#[async_trait]
impl Repositories for PgRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.blocks
    }

    fn extrinsics(&self) -> &dyn ExtrinsicRepository {
        &self.extrinsics
    }

    fn events(&self) -> &dyn EventRepository {
        &self.events
    }

    fn transfers(&self) -> &dyn TransferRepository {
        &self.transfers
    }

    fn accounts(&self) -> &dyn AccountRepository {
        &self.accounts
    }

    fn cursor(&self) -> &dyn CursorRepository {
        &self.cursor
    }

    async fn persist_records_atomic(&self, records: &BlockRecords) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        extrinsic_repo::insert_extrinsics(&mut *tx, &records.extrinsics).await?;
        extrinsic_repo::insert_calls(&mut *tx, &records.calls).await?;
        event_repo::insert_events(&mut *tx, &records.events).await?;
        transfer_repo::insert_system_token_transfers(&mut *tx, &records.system_token_transfers)
            .await?;
        transfer_repo::insert_appchain_to_near_transfers(
            &mut *tx,
            &records.appchain_to_near_transfers,
        )
        .await?;
        transfer_repo::insert_near_to_appchain_transfers(
            &mut *tx,
            &records.near_to_appchain_transfers,
        )
        .await?;
        transfer_repo::insert_upward_messages(&mut *tx, &records.upward_messages).await?;
        account_repo::insert_accounts(&mut *tx, &records.new_accounts).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }
}
