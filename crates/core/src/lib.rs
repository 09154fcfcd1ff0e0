//! Core domain layer for the Pulpo appchain indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and the
//! block-ingestion pipeline for an Octopus Network appchain. It follows
//! hexagonal architecture principles - this is the innermost layer with
//! no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      pulpo (binary)                         │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │       pulpo-substrate        │        pulpo-storage         │
//! │         (subxt RPC)          │         (PostgreSQL)         │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                 pulpo-core  ← YOU ARE HERE                  │
//! │               (models, ports, services)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain records (Block, Extrinsic, Call, Event, transfers, Account)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - The per-block ingestion pipeline and the indexer loop
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! Ports define interfaces that external adapters must implement:
//!
//! - [`ports::BlockSource`] - Fetch finalized blocks from the appchain
//! - [`ports::AccountStateQuery`] - Fetch live on-chain account state
//! - [`ports::Repositories`] - Persist and look up indexed records
//!
//! ## Block ingestion
//!
//! Each finalized block is processed exactly once, in increasing block-number
//! order, by [`services::BlockPipeline`]:
//!
//! 1. Correlate every extrinsic with the events it emitted
//! 2. Flatten calls (including batched/nested sub-calls)
//! 3. Classify events; extract native and cross-chain bridge transfers
//! 4. Reconcile every touched account against live chain state
//! 5. Persist the block, then all dependent records as one batch
//!
//! All record identifiers are derived from block number plus positional
//! indexes (or chain-assigned bridge sequences), so re-running a block
//! yields identical output.

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(test)]
pub mod testing;
