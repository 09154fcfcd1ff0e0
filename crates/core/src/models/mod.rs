//! Domain models representing indexed appchain data.
//!
//! These models are storage-agnostic and represent the canonical form of
//! indexed data within the domain layer. Every identifier is derived from the
//! block number plus a positional index (or a chain-assigned bridge
//! sequence), never from wall-clock or random values, so re-processing a
//! block produces identical records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Block Hash
// =============================================================================

/// 32-byte block hash (Blake2-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Parse from hex string (with or without 0x prefix).
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// Convert to 0x-prefixed hex string.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Get the inner bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Account identifier as a string: SS58 for local appchain accounts,
/// an opaque NEAR account name for the bridge counterpart side.
pub type AccountId = String;

// =============================================================================
// Block & Chain Data
// =============================================================================

/// Indexed block header data.
///
/// Written before any dependent record of the same block so foreign keys
/// always resolve, even under partial-failure replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number (height).
    pub number: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent block hash.
    pub parent_hash: BlockHash,
    /// Runtime spec version at this block.
    pub spec_version: u32,
    /// Timestamp from `pallet_timestamp` (if available).
    pub timestamp: Option<DateTime<Utc>>,
    /// Number of extrinsics in this block.
    pub extrinsic_count: u32,
    /// Number of events emitted during this block.
    pub event_count: u32,
}

// =============================================================================
// Extrinsics & Calls
// =============================================================================

/// Indexed extrinsic (transaction or inherent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extrinsic {
    /// Unique identifier: `{block_number}-{extrinsic_index}`.
    pub id: String,
    /// Block number containing this extrinsic.
    pub block_number: u64,
    /// Block hash containing this extrinsic.
    pub block_hash: BlockHash,
    /// Index within the block (0-based).
    pub index: u32,
    /// Extrinsic hash (`0x…`).
    pub hash: String,
    /// Pallet name (e.g., "Balances").
    pub pallet: String,
    /// Call name (e.g., "transfer_keep_alive").
    pub call: String,
    /// Call arguments as JSON.
    pub args: serde_json::Value,
    /// Signer account (None for unsigned/inherent).
    pub signer: Option<AccountId>,
    /// Signature bytes as hex (if signed).
    pub signature: Option<String>,
    /// Signer nonce; zero when absent or unparsable.
    pub nonce: u64,
    /// Tip paid in the smallest unit; zero when absent or unparsable.
    pub tip: u128,
    /// Whether the extrinsic carries a signature.
    pub is_signed: bool,
    /// True iff the correlated event subset contains `System.ExtrinsicSuccess`.
    pub success: bool,
    /// Block timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Extrinsic {
    /// Deterministic extrinsic identifier.
    pub fn id_for(block_number: u64, index: u32) -> String {
        format!("{}-{}", block_number, index)
    }
}

/// One call within an extrinsic.
///
/// A plain extrinsic yields a single call at index 0; batch/proxy-style
/// extrinsics additionally yield one record per nested sub-call, in
/// depth-first nesting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Unique identifier: `{extrinsic_id}-{call_index}`.
    pub id: String,
    /// Owning extrinsic.
    pub extrinsic_id: String,
    /// Position in depth-first nesting order (top-level call is 0).
    pub index: u32,
    /// Pallet name.
    pub pallet: String,
    /// Call name.
    pub call: String,
    /// Call arguments as JSON.
    pub args: serde_json::Value,
}

// =============================================================================
// Events
// =============================================================================

/// Indexed event emitted while applying an extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier: `{block_number}-{global_event_index}`.
    ///
    /// The global index increases monotonically across all extrinsics of the
    /// block, matching source emission order.
    pub id: String,
    /// Block number containing this event.
    pub block_number: u64,
    /// Block hash containing this event.
    pub block_hash: BlockHash,
    /// Global index within the block (0-based).
    pub index: u32,
    /// Extrinsic that emitted this event.
    pub extrinsic_id: String,
    /// Pallet name (e.g., "Balances").
    pub pallet: String,
    /// Event variant name (e.g., "Transfer").
    pub name: String,
    /// Opaque serialized copy of the event payload, for generic querying.
    pub data: serde_json::Value,
}

impl Event {
    /// Deterministic event identifier.
    pub fn id_for(block_number: u64, global_index: u32) -> String {
        format!("{}-{}", block_number, global_index)
    }
}

// =============================================================================
// Transfers
// =============================================================================

/// A native-currency transfer extracted from a `Balances.Transfer` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTokenTransfer {
    /// Unique identifier: `{block_number}-{global_event_index}`.
    pub id: String,
    /// Sender account.
    pub from: AccountId,
    /// Recipient account.
    pub to: AccountId,
    /// Amount transferred (in smallest unit).
    pub amount: u128,
    /// Block timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Extrinsic that emitted the event.
    pub extrinsic_id: String,
}

/// Asset payload of a bridge transfer.
///
/// The three shapes are mutually exclusive and determined by the event
/// method that produced the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeAsset {
    /// Native fungible token (lock/unlock).
    Fungible {
        /// Amount in the smallest unit.
        amount: u128,
    },
    /// Wrapped NEP-141 fungible token (burn/mint).
    Nep141 {
        /// Appchain-side asset identifier.
        asset_id: u32,
        /// Amount in the smallest unit.
        amount: u128,
    },
    /// Non-fungible item (lock/unlock).
    Nonfungible {
        /// Collection identifier.
        collection: u128,
        /// Item identifier within the collection.
        item: u128,
    },
}

/// Direction-specific kind of an appchain → NEAR transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundBridgeKind {
    Locked,
    Nep141Burned,
    NonfungibleLocked,
}

impl OutboundBridgeKind {
    /// The emitting event's method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "Locked",
            Self::Nep141Burned => "Nep141Burned",
            Self::NonfungibleLocked => "NonfungibleLocked",
        }
    }
}

/// Direction-specific kind of a NEAR → appchain transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundBridgeKind {
    Unlocked,
    Nep141Minted,
    NonfungibleUnlocked,
}

impl InboundBridgeKind {
    /// The emitting event's method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "Unlocked",
            Self::Nep141Minted => "Nep141Minted",
            Self::NonfungibleUnlocked => "NonfungibleUnlocked",
        }
    }
}

/// An outbound bridge transfer (appchain → NEAR).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppchainToNearTransfer {
    /// Unique identifier: the sanitized chain-assigned sequence.
    pub id: String,
    /// Local sender account.
    pub sender: AccountId,
    /// Opaque NEAR-side receiver.
    pub receiver: String,
    /// Transfer kind (emitting event method).
    pub kind: OutboundBridgeKind,
    /// Asset payload.
    pub asset: BridgeAsset,
    /// Chain-assigned monotonic sequence number.
    pub sequence: u64,
    /// Block timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Extrinsic that emitted the event.
    pub extrinsic_id: String,
}

/// An inbound bridge transfer (NEAR → appchain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearToAppchainTransfer {
    /// Unique identifier: the sanitized chain-assigned sequence.
    pub id: String,
    /// Opaque NEAR-side sender.
    pub sender: String,
    /// Local receiver account.
    pub receiver: AccountId,
    /// Transfer kind (emitting event method).
    pub kind: InboundBridgeKind,
    /// Asset payload.
    pub asset: BridgeAsset,
    /// Chain-assigned monotonic sequence number.
    pub sequence: u64,
    /// Block timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Extrinsic that emitted the event.
    pub extrinsic_id: String,
}

/// One outbound message from an `OctopusUpwardMessages.Committed` batch.
///
/// A single committing event carries a whole batch; one record is produced
/// per message, preserving the batch's internal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpwardMessage {
    /// Unique identifier: `{block_number}-{event_index}-{message_index}`.
    pub id: String,
    /// Message nonce assigned by the pallet.
    pub nonce: u64,
    /// Message payload as hex.
    pub payload: String,
    /// Block timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Extrinsic that committed the batch (if committed while applying one).
    pub extrinsic_id: Option<String>,
}

// =============================================================================
// Accounts
// =============================================================================

/// Reconciled on-chain account state.
///
/// Created once, then mutated in place on every block where the live chain
/// state changed. The id is stable for the account's entire lifetime and
/// records are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account address (SS58).
    pub id: AccountId,
    /// Transaction nonce.
    pub nonce: u64,
    /// Free balance.
    pub free_balance: u128,
    /// Reserved balance.
    pub reserved_balance: u128,
    /// Miscellaneous frozen balance.
    pub misc_frozen_balance: u128,
    /// Fee-frozen balance.
    pub fee_frozen_balance: u128,
    /// Timestamp of the block that first touched this account.
    pub created_at: Option<DateTime<Utc>>,
    /// First transfer counterparty observed when the account was created,
    /// in extraction order (first association wins).
    pub created_by: Option<AccountId>,
}

// =============================================================================
// Indexer State
// =============================================================================

/// Indexer cursor tracking progress.
///
/// The cursor tracks the last fully persisted block for each chain, enabling
/// the indexer to resume from where it left off. It only advances after a
/// block's whole batch has been written; a failed block leaves it untouched
/// and is retried from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerCursor {
    /// Chain identifier (genesis hash).
    pub chain_id: String,
    /// Last fully indexed block number.
    pub last_indexed_block: u64,
    /// Last indexed block hash.
    pub last_indexed_hash: BlockHash,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
