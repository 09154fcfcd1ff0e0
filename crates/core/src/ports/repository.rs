//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `pulpo-storage`).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    Account, AppchainToNearTransfer, Block, Call, Event, Extrinsic, IndexerCursor,
    NearToAppchainTransfer, SystemTokenTransfer, UpwardMessage,
};

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for block data.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Insert (or overwrite) one block.
    ///
    /// Called before any dependent record of the same block is written, so
    /// foreign keys always resolve under partial-failure replays.
    async fn insert_block(&self, block: &Block) -> StorageResult<()>;

    /// Get block by number.
    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>>;

    /// Get latest indexed block number.
    async fn latest_block_number(&self) -> StorageResult<Option<u64>>;
}

/// Repository for extrinsic and call data.
#[async_trait]
pub trait ExtrinsicRepository: Send + Sync {
    /// Insert a batch of extrinsics.
    async fn insert_extrinsics(&self, extrinsics: &[Extrinsic]) -> StorageResult<()>;

    /// Insert a batch of calls.
    async fn insert_calls(&self, calls: &[Call]) -> StorageResult<()>;

    /// Get extrinsic by ID.
    async fn get_extrinsic(&self, id: &str) -> StorageResult<Option<Extrinsic>>;
}

/// Repository for event data.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert a batch of events.
    async fn insert_events(&self, events: &[Event]) -> StorageResult<()>;

    /// Get event by ID.
    async fn get_event(&self, id: &str) -> StorageResult<Option<Event>>;
}

/// Repository for transfer records of all kinds.
#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Insert a batch of native-token transfers.
    async fn insert_system_token_transfers(
        &self,
        transfers: &[SystemTokenTransfer],
    ) -> StorageResult<()>;

    /// Insert a batch of outbound bridge transfers.
    async fn insert_appchain_to_near_transfers(
        &self,
        transfers: &[AppchainToNearTransfer],
    ) -> StorageResult<()>;

    /// Insert a batch of inbound bridge transfers.
    async fn insert_near_to_appchain_transfers(
        &self,
        transfers: &[NearToAppchainTransfer],
    ) -> StorageResult<()>;

    /// Insert a batch of upward messages.
    async fn insert_upward_messages(&self, messages: &[UpwardMessage]) -> StorageResult<()>;
}

/// Repository for account records.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a batch of newly created accounts.
    async fn insert_accounts(&self, accounts: &[Account]) -> StorageResult<()>;

    /// Get account by address.
    async fn get_account(&self, id: &str) -> StorageResult<Option<Account>>;

    /// Update one existing account in place.
    async fn save_account(&self, account: &Account) -> StorageResult<()>;
}

/// Repository for indexer cursor state.
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Get current cursor for a chain.
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>>;

    /// Get any existing cursor (for chain mismatch detection).
    async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>>;

    /// Update cursor (upsert).
    async fn set_cursor(&self, cursor: &IndexerCursor) -> StorageResult<()>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// All dependent records of one block, persisted as one logical batch after
/// the block record itself.
#[derive(Debug, Default)]
pub struct BlockRecords {
    pub extrinsics: Vec<Extrinsic>,
    pub calls: Vec<Call>,
    pub events: Vec<Event>,
    pub system_token_transfers: Vec<SystemTokenTransfer>,
    pub appchain_to_near_transfers: Vec<AppchainToNearTransfer>,
    pub near_to_appchain_transfers: Vec<NearToAppchainTransfer>,
    pub upward_messages: Vec<UpwardMessage>,
    /// Accounts first seen in this block, in extraction order.
    pub new_accounts: Vec<Account>,
}

/// Combined repository access for the indexer.
///
/// This trait provides access to all individual repositories and the atomic
/// batch write that spans every dependent table of one block.
#[async_trait]
pub trait Repositories: Send + Sync {
    /// Access the block repository.
    fn blocks(&self) -> &dyn BlockRepository;

    /// Access the extrinsic repository.
    fn extrinsics(&self) -> &dyn ExtrinsicRepository;

    /// Access the event repository.
    fn events(&self) -> &dyn EventRepository;

    /// Access the transfer repository.
    fn transfers(&self) -> &dyn TransferRepository;

    /// Access the account repository.
    fn accounts(&self) -> &dyn AccountRepository;

    /// Access the cursor repository.
    fn cursor(&self) -> &dyn CursorRepository;

    /// Persist all dependent records of one block in a single transaction.
    ///
    /// The owning block must already have been written via
    /// [`BlockRepository::insert_block`]. If any insert fails, everything
    /// is rolled back.
    async fn persist_records_atomic(&self, records: &BlockRecords) -> StorageResult<()>;
}
