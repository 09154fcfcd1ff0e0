//! Substrate RPC adapter for the Pulpo indexer.
//!
//! This crate implements the [`BlockSource`] and [`AccountStateQuery`] ports
//! from `pulpo-core`, providing connectivity to the Octopus appchain via
//! WebSocket RPC.
//!
//! # Features
//!
//! - Finalized block subscription with automatic reconnection
//! - Dynamic metadata decoding using subxt
//! - SCALE to JSON conversion for events, extrinsics, and nested call trees
//! - Compact timestamp extraction from `Timestamp.set` inherent
//! - Live `System.Account` state lookups for account reconciliation
//!
//! # Usage
//!
//! ```ignore
//! use pulpo_substrate::{SubstrateClient, SubstrateClientConfig};
//!
//! let config = SubstrateClientConfig {
//!     ws_url: "ws://localhost:9944".to_string(),
//! };
//!
//! let client = SubstrateClient::connect(config).await?;
//! let genesis = client.genesis_hash().await?;
//! let mut stream = client.subscribe_finalized().await?;
//!
//! while let Some(block) = stream.next().await {
//!     // Process block...
//! }
//! ```
//!
//! # Architecture
//!
//! The client uses subxt's ChainHead backend for efficient block fetching.
//! Block data is decoded into `RawBlock`, `RawExtrinsic`, and `RawEvent`
//! structures defined in `pulpo-core`.
//!
//! [`BlockSource`]: pulpo_core::ports::BlockSource
//! [`AccountStateQuery`]: pulpo_core::ports::AccountStateQuery

mod client;
mod decode;

pub use client::{SubstrateClient, SubstrateClientConfig};
