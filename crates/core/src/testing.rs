//! In-memory fakes for exercising services without a database or node.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::error::{ChainError, ChainResult, StorageError, StorageResult};
use crate::models::{
    Account, AppchainToNearTransfer, Block, BlockHash, Call, Event, Extrinsic, IndexerCursor,
    NearToAppchainTransfer, SystemTokenTransfer, UpwardMessage,
};
use crate::ports::{
    AccountRepository, AccountState, AccountStateQuery, BlockRecords, BlockRepository,
    BlockSource, CursorRepository, EventRepository, ExtrinsicRepository, FinalizedBlockStream,
    FinalizedHead, RawBlock, Repositories, TransferRepository,
};

// =============================================================================
// Repositories
// =============================================================================

#[derive(Debug, Default)]
struct Tables {
    blocks: BTreeMap<u64, Block>,
    extrinsics: BTreeMap<String, Extrinsic>,
    calls: BTreeMap<String, Call>,
    events: BTreeMap<String, Event>,
    system_token_transfers: BTreeMap<String, SystemTokenTransfer>,
    appchain_to_near_transfers: BTreeMap<String, AppchainToNearTransfer>,
    near_to_appchain_transfers: BTreeMap<String, NearToAppchainTransfer>,
    upward_messages: BTreeMap<String, UpwardMessage>,
    accounts: BTreeMap<String, Account>,
    cursors: BTreeMap<String, IndexerCursor>,
}

/// Deterministic view of every block-derived table, for equality checks.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub blocks: Vec<Block>,
    pub extrinsics: Vec<Extrinsic>,
    pub calls: Vec<Call>,
    pub events: Vec<Event>,
    pub system_token_transfers: Vec<SystemTokenTransfer>,
    pub appchain_to_near_transfers: Vec<AppchainToNearTransfer>,
    pub near_to_appchain_transfers: Vec<NearToAppchainTransfer>,
    pub upward_messages: Vec<UpwardMessage>,
    pub accounts: Vec<Account>,
}

/// In-memory implementation of every repository trait.
///
/// Inserts are upserts keyed the same way the SQL schema is, so replay
/// behavior matches the real store.
#[derive(Debug, Default)]
pub struct MemoryRepositories {
    tables: Mutex<Tables>,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account directly, bypassing reconciliation.
    pub async fn seed_account(&self, account: Account) {
        let mut tables = self.tables.lock().await;
        tables.accounts.insert(account.id.clone(), account);
    }

    pub async fn all_calls(&self) -> Vec<Call> {
        self.tables.lock().await.calls.values().cloned().collect()
    }

    pub async fn all_system_token_transfers(&self) -> Vec<SystemTokenTransfer> {
        let tables = self.tables.lock().await;
        tables.system_token_transfers.values().cloned().collect()
    }

    pub async fn all_appchain_to_near_transfers(&self) -> Vec<AppchainToNearTransfer> {
        let tables = self.tables.lock().await;
        tables.appchain_to_near_transfers.values().cloned().collect()
    }

    pub async fn all_near_to_appchain_transfers(&self) -> Vec<NearToAppchainTransfer> {
        let tables = self.tables.lock().await;
        tables.near_to_appchain_transfers.values().cloned().collect()
    }

    pub async fn all_upward_messages(&self) -> Vec<UpwardMessage> {
        let tables = self.tables.lock().await;
        tables.upward_messages.values().cloned().collect()
    }

    pub async fn snapshot(&self) -> Snapshot {
        let tables = self.tables.lock().await;
        Snapshot {
            blocks: tables.blocks.values().cloned().collect(),
            extrinsics: tables.extrinsics.values().cloned().collect(),
            calls: tables.calls.values().cloned().collect(),
            events: tables.events.values().cloned().collect(),
            system_token_transfers: tables.system_token_transfers.values().cloned().collect(),
            appchain_to_near_transfers: tables
                .appchain_to_near_transfers
                .values()
                .cloned()
                .collect(),
            near_to_appchain_transfers: tables
                .near_to_appchain_transfers
                .values()
                .cloned()
                .collect(),
            upward_messages: tables.upward_messages.values().cloned().collect(),
            accounts: tables.accounts.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl BlockRepository for MemoryRepositories {
    async fn insert_block(&self, block: &Block) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        tables.blocks.insert(block.number, block.clone());
        Ok(())
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        Ok(self.tables.lock().await.blocks.get(&number).cloned())
    }

    async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
        Ok(self.tables.lock().await.blocks.keys().next_back().copied())
    }
}

#[async_trait]
impl ExtrinsicRepository for MemoryRepositories {
    async fn insert_extrinsics(&self, extrinsics: &[Extrinsic]) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for ext in extrinsics {
            tables.extrinsics.insert(ext.id.clone(), ext.clone());
        }
        Ok(())
    }

    async fn insert_calls(&self, calls: &[Call]) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for call in calls {
            tables.calls.insert(call.id.clone(), call.clone());
        }
        Ok(())
    }

    async fn get_extrinsic(&self, id: &str) -> StorageResult<Option<Extrinsic>> {
        Ok(self.tables.lock().await.extrinsics.get(id).cloned())
    }
}

#[async_trait]
impl EventRepository for MemoryRepositories {
    async fn insert_events(&self, events: &[Event]) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for event in events {
            tables.events.insert(event.id.clone(), event.clone());
        }
        Ok(())
    }

    async fn get_event(&self, id: &str) -> StorageResult<Option<Event>> {
        Ok(self.tables.lock().await.events.get(id).cloned())
    }
}

#[async_trait]
impl TransferRepository for MemoryRepositories {
    async fn insert_system_token_transfers(
        &self,
        transfers: &[SystemTokenTransfer],
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for t in transfers {
            tables.system_token_transfers.insert(t.id.clone(), t.clone());
        }
        Ok(())
    }

    async fn insert_appchain_to_near_transfers(
        &self,
        transfers: &[AppchainToNearTransfer],
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for t in transfers {
            // Same guard as the Postgres upsert: a stored sequence only
            // yields to a replay of the same extrinsic.
            if let Some(existing) = tables.appchain_to_near_transfers.get(&t.id)
                && existing.extrinsic_id != t.extrinsic_id
            {
                return Err(StorageError::ConstraintViolation(format!(
                    "bridge sequence {} already recorded for another extrinsic",
                    t.id
                )));
            }
            tables
                .appchain_to_near_transfers
                .insert(t.id.clone(), t.clone());
        }
        Ok(())
    }

    async fn insert_near_to_appchain_transfers(
        &self,
        transfers: &[NearToAppchainTransfer],
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for t in transfers {
            if let Some(existing) = tables.near_to_appchain_transfers.get(&t.id)
                && existing.extrinsic_id != t.extrinsic_id
            {
                return Err(StorageError::ConstraintViolation(format!(
                    "bridge sequence {} already recorded for another extrinsic",
                    t.id
                )));
            }
            tables
                .near_to_appchain_transfers
                .insert(t.id.clone(), t.clone());
        }
        Ok(())
    }

    async fn insert_upward_messages(&self, messages: &[UpwardMessage]) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for m in messages {
            tables.upward_messages.insert(m.id.clone(), m.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for MemoryRepositories {
    async fn insert_accounts(&self, accounts: &[Account]) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for account in accounts {
            tables.accounts.insert(account.id.clone(), account.clone());
        }
        Ok(())
    }

    async fn get_account(&self, id: &str) -> StorageResult<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(id).cloned())
    }

    async fn save_account(&self, account: &Account) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        tables.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }
}

#[async_trait]
impl CursorRepository for MemoryRepositories {
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>> {
        Ok(self.tables.lock().await.cursors.get(chain_id).cloned())
    }

    async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>> {
        Ok(self.tables.lock().await.cursors.values().next().cloned())
    }

    async fn set_cursor(&self, cursor: &IndexerCursor) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        tables.cursors.insert(cursor.chain_id.clone(), cursor.clone());
        Ok(())
    }
}

#[async_trait]
impl Repositories for MemoryRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        self
    }

    fn extrinsics(&self) -> &dyn ExtrinsicRepository {
        self
    }

    fn events(&self) -> &dyn EventRepository {
        self
    }

    fn transfers(&self) -> &dyn TransferRepository {
        self
    }

    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn cursor(&self) -> &dyn CursorRepository {
        self
    }

    async fn persist_records_atomic(&self, records: &BlockRecords) -> StorageResult<()> {
        self.insert_extrinsics(&records.extrinsics).await?;
        self.insert_calls(&records.calls).await?;
        self.insert_events(&records.events).await?;
        self.insert_system_token_transfers(&records.system_token_transfers)
            .await?;
        self.insert_appchain_to_near_transfers(&records.appchain_to_near_transfers)
            .await?;
        self.insert_near_to_appchain_transfers(&records.near_to_appchain_transfers)
            .await?;
        self.insert_upward_messages(&records.upward_messages).await?;
        self.insert_accounts(&records.new_accounts).await?;
        Ok(())
    }
}

// =============================================================================
// Account state query
// =============================================================================

/// In-memory [`AccountStateQuery`].
///
/// Unknown addresses resolve to default (all-zero) state, matching the
/// behavior of `System.Account` for nonexistent accounts. Addresses
/// registered with [`fail_for`](Self::fail_for) error instead.
#[derive(Debug, Default)]
pub struct MemoryAccountStateQuery {
    states: Mutex<HashMap<String, AccountState>>,
    failures: Mutex<HashMap<String, String>>,
}

impl MemoryAccountStateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_state(&self, address: &str, state: AccountState) {
        self.states.lock().await.insert(address.to_string(), state);
    }

    pub async fn fail_for(&self, address: &str, error: ChainError) {
        self.failures
            .lock()
            .await
            .insert(address.to_string(), error.to_string());
    }

    /// Stop failing lookups for `address`, modeling a transient outage.
    pub async fn clear_failure(&self, address: &str) {
        self.failures.lock().await.remove(address);
    }
}

#[async_trait]
impl AccountStateQuery for MemoryAccountStateQuery {
    async fn account_state(&self, address: &str) -> ChainResult<AccountState> {
        if let Some(message) = self.failures.lock().await.get(address) {
            return Err(ChainError::AccountStateError {
                address: address.to_string(),
                message: message.clone(),
            });
        }
        Ok(self
            .states
            .lock()
            .await
            .get(address)
            .copied()
            .unwrap_or_default())
    }
}

// =============================================================================
// Block source
// =============================================================================

/// In-memory [`BlockSource`] that serves a fixed sequence of blocks.
///
/// The first subscription drains the sequence; later subscriptions yield an
/// empty stream, modeling a reconnect with no new finalized blocks.
#[derive(Debug)]
pub struct MemoryBlockSource {
    head: FinalizedHead,
    pending: Arc<Mutex<Vec<RawBlock>>>,
}

impl MemoryBlockSource {
    pub fn new(blocks: Vec<RawBlock>) -> Self {
        let head = blocks
            .last()
            .map(|b| FinalizedHead {
                number: b.number,
                hash: b.hash,
            })
            .unwrap_or(FinalizedHead {
                number: 0,
                hash: [0u8; 32],
            });
        Self {
            head,
            pending: Arc::new(Mutex::new(blocks)),
        }
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn genesis_hash(&self) -> ChainResult<BlockHash> {
        Ok(BlockHash([0u8; 32]))
    }

    async fn finalized_head(&self) -> ChainResult<FinalizedHead> {
        Ok(self.head.clone())
    }

    async fn subscribe_finalized(&self) -> ChainResult<FinalizedBlockStream> {
        let blocks = std::mem::take(&mut *self.pending.lock().await);
        Ok(futures::stream::iter(blocks.into_iter().map(Ok)).boxed())
    }

    async fn runtime_version(&self) -> ChainResult<u32> {
        Ok(100)
    }
}
