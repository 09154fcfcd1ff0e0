//! Core business logic: the per-block ingestion pipeline and the
//! finalized-head indexer loop.

pub mod accounts;
pub mod classify;
pub mod correlate;
pub mod indexer;
pub mod pipeline;

pub use accounts::{ReconcileOutcome, TouchedAccounts, reconcile_accounts};
pub use classify::{Route, route, sanitize_sequence};
pub use correlate::{WrappedExtrinsic, flatten_calls, wrap_extrinsics};
pub use indexer::{IndexerConfig, IndexerService};
pub use pipeline::{BlockPipeline, PipelineConfig};
