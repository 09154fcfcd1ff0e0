//! Port trait for the appchain block data source.
//!
//! This trait defines the interface for fetching finalized blocks from the
//! appchain. Implementations live in the infrastructure layer
//! (e.g., `pulpo-substrate`).

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::ChainResult;
use crate::models::BlockHash;

/// Raw block data from the chain before domain transformation.
#[derive(Debug, Clone)]
pub struct RawBlock {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: [u8; 32],
    /// Parent hash.
    pub parent_hash: [u8; 32],
    /// Runtime spec version at this block.
    pub spec_version: u32,
    /// Block timestamp in milliseconds (from the Timestamp pallet).
    pub timestamp: Option<u64>,
    /// Decoded extrinsics, in block order.
    pub extrinsics: Vec<RawExtrinsic>,
    /// Decoded events, in emission order across the whole block.
    pub events: Vec<RawEvent>,
}

/// Raw extrinsic data.
#[derive(Debug, Clone)]
pub struct RawExtrinsic {
    /// Index in block.
    pub index: u32,
    /// Extrinsic hash (`0x…`).
    pub hash: String,
    /// Pallet name.
    pub pallet: String,
    /// Call name.
    pub call: String,
    /// Call arguments as JSON.
    pub args: serde_json::Value,
    /// Nested sub-calls for batch/proxy-style composition.
    pub sub_calls: Vec<RawCall>,
    /// Signer address (SS58), if signed.
    pub signer: Option<String>,
    /// Signature bytes as hex, if signed.
    pub signature: Option<String>,
    /// Signer nonce as a raw decimal string, if present.
    ///
    /// Left undecoded so the pipeline applies its zero fallback uniformly.
    pub nonce: Option<String>,
    /// Tip as a raw decimal string, if present.
    pub tip: Option<String>,
}

/// One call inside an extrinsic's call tree.
#[derive(Debug, Clone)]
pub struct RawCall {
    /// Pallet name.
    pub pallet: String,
    /// Call name.
    pub call: String,
    /// Call arguments as JSON.
    pub args: serde_json::Value,
    /// Nested sub-calls, in source order.
    pub sub_calls: Vec<RawCall>,
}

/// Dispatch phase of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    /// Emitted while applying the extrinsic at this index.
    ApplyExtrinsic(u32),
    /// Emitted during block initialization.
    Initialization,
    /// Emitted during block finalization.
    Finalization,
    /// Phase data was malformed or unrecognized.
    ///
    /// Such events are excluded from every extrinsic's correlated subset,
    /// never duplicated into one.
    Unknown,
}

/// Raw event data.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Index in the block's full event list.
    pub index: u32,
    /// Dispatch phase.
    pub phase: EventPhase,
    /// Pallet name.
    pub pallet: String,
    /// Event variant name.
    pub name: String,
    /// Positional argument tuple as a JSON array.
    pub data: serde_json::Value,
}

/// Notification when a new block is finalized.
#[derive(Debug, Clone)]
pub struct FinalizedHead {
    pub number: u64,
    pub hash: [u8; 32],
}

/// Stream of finalized blocks.
pub type FinalizedBlockStream = Pin<Box<dyn Stream<Item = ChainResult<RawBlock>> + Send>>;

/// Port trait for the appchain block data source.
///
/// Designed for chain head indexing only: the pipeline consumes finalized
/// blocks strictly in increasing block-number order.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Get the genesis hash of the connected chain.
    async fn genesis_hash(&self) -> ChainResult<BlockHash>;

    /// Get the current finalized block head.
    async fn finalized_head(&self) -> ChainResult<FinalizedHead>;

    /// Subscribe to finalized blocks.
    async fn subscribe_finalized(&self) -> ChainResult<FinalizedBlockStream>;

    /// Get current runtime version.
    async fn runtime_version(&self) -> ChainResult<u32>;
}
