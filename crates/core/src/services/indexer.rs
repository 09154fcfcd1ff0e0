//! Indexer service, orchestrating the finalized-block loop.
//!
//! Subscribes to finalized blocks and runs each through the
//! [`BlockPipeline`], advancing the cursor only after a block has been fully
//! persisted. Finality makes rollback handling unnecessary here: blocks
//! arrive in increasing order and are never retracted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::models::{BlockHash, IndexerCursor};
use crate::ports::{AccountStateQuery, BlockSource, RawBlock, Repositories};
use crate::services::pipeline::BlockPipeline;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    /// Chain identifier (genesis hash).
    pub chain_id: String,
}

// =============================================================================
// IndexerService
// =============================================================================

/// Chain-head indexer.
///
/// # Flow
///
/// 1. Verify the connected chain against any previously indexed data
/// 2. Subscribe to finalized blocks
/// 3. Run each block through the pipeline
/// 4. Advance the cursor after the block is fully persisted
///
/// A failed block leaves the cursor untouched; the subscription keeps
/// delivering and the block is retried on the next reconnect.
pub struct IndexerService<S: BlockSource, R: Repositories, Q: AccountStateQuery> {
    config: IndexerConfig,
    block_source: Arc<S>,
    repositories: Arc<R>,
    pipeline: BlockPipeline<R, Q>,
}

impl<S: BlockSource, R: Repositories, Q: AccountStateQuery> IndexerService<S, R, Q> {
    pub fn new(
        config: IndexerConfig,
        block_source: Arc<S>,
        repositories: Arc<R>,
        pipeline: BlockPipeline<R, Q>,
    ) -> Self {
        Self {
            config,
            block_source,
            repositories,
            pipeline,
        }
    }

    /// Start the indexer.
    ///
    /// Runs until the shutdown signal flips or an unrecoverable error
    /// (chain mismatch) occurs.
    #[instrument(skip_all, fields(chain = %&self.config.chain_id[..16.min(self.config.chain_id.len())]))]
    pub async fn run(
        &self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        info!("⛓️  Starting indexer");

        self.verify_chain_id().await?;

        let head = self.block_source.finalized_head().await?;
        debug!(head = head.number, "Chain head detected");

        self.follow_finalized(&mut shutdown_rx).await
    }

    /// Verify the connected chain matches any existing indexed data.
    /// Returns error if the database contains data from a different chain.
    async fn verify_chain_id(&self) -> IndexerResult<()> {
        let existing_cursor = self.repositories.cursor().get_any_cursor().await?;

        if let Some(cursor) = existing_cursor {
            if cursor.chain_id != self.config.chain_id {
                let connected_short = &self.config.chain_id[..16.min(self.config.chain_id.len())];
                let expected_short = &cursor.chain_id[..16.min(cursor.chain_id.len())];

                error!(
                    connected = connected_short,
                    expected = expected_short,
                    "❌ Chain mismatch! Database contains data from a different chain"
                );
                error!(
                    "   Manual action required: either connect to the correct chain or clear the database"
                );

                return Err(IndexerError::ChainMismatch {
                    connected: self.config.chain_id.clone(),
                    expected: cursor.chain_id,
                });
            }
            debug!("Chain ID verified");
        }

        Ok(())
    }

    /// Follow finalized blocks via subscription, reconnecting with
    /// exponential backoff.
    #[instrument(skip_all)]
    async fn follow_finalized(
        &self,
        shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
        const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
        let mut retry_delay = INITIAL_RETRY_DELAY;

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            match self.block_source.subscribe_finalized().await {
                Ok(mut stream) => {
                    debug!("📡 Subscription established");
                    retry_delay = INITIAL_RETRY_DELAY; // Reset backoff on success

                    while let Some(result) = stream.next().await {
                        if *shutdown_rx.borrow() {
                            debug!("Shutdown requested");
                            return Err(IndexerError::ShutdownRequested);
                        }

                        match result {
                            Ok(raw_block) => {
                                let block_number = raw_block.number;
                                match self.process_block(raw_block).await {
                                    Ok(true) => {
                                        trace!(block = block_number, "Block done");
                                    }
                                    Ok(false) => {
                                        trace!(
                                            block = block_number,
                                            "Block skipped (already indexed)"
                                        );
                                    }
                                    Err(e) => {
                                        error!(block = block_number, error = ?e, "❌ Block processing failed");
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = ?e, "⚠️  Subscription error, reconnecting...");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = ?e,
                        retry_in_ms = retry_delay.as_millis(),
                        "⚠️  Failed to subscribe, retrying..."
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {
                    debug!(retry_delay_ms = retry_delay.as_millis(), "🔄 Reconnecting to chain...");
                    // Exponential backoff: double the delay, up to max
                    retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Process a single block and advance the cursor.
    /// Returns `Ok(true)` if processed, `Ok(false)` if skipped.
    #[instrument(skip(self, raw_block), fields(block = raw_block.number))]
    async fn process_block(&self, raw_block: RawBlock) -> IndexerResult<bool> {
        let block_number = raw_block.number;
        trace!("Processing block");

        // Skip already indexed blocks (happens on reconnect). The cursor is
        // the completion marker: it only advances after the full batch
        // persists, so a block that failed mid-pipeline (its header row may
        // already exist) is still retried from scratch. A differing hash for
        // the same finalized height would mean the node served inconsistent
        // data; reprocess and let the upserts win.
        let cursor = self
            .repositories
            .cursor()
            .get_cursor(&self.config.chain_id)
            .await?;
        if cursor.is_some_and(|c| c.last_indexed_block >= block_number) {
            let incoming_hash = BlockHash(raw_block.hash);
            match self.repositories.blocks().get_block(block_number).await? {
                Some(existing_block) if existing_block.hash == incoming_hash => {
                    trace!("Block already indexed, skipping");
                    return Ok(false);
                }
                Some(existing_block) => {
                    warn!(
                        block = block_number,
                        stored = %existing_block.hash,
                        incoming = %incoming_hash,
                        "⚠️  Stored hash differs for finalized block, reprocessing"
                    );
                }
                None => {
                    warn!(
                        block = block_number,
                        "⚠️  Cursor ahead of stored blocks, reprocessing"
                    );
                }
            }
        }

        self.pipeline.process(&raw_block).await?;

        // Cursor only advances after the full batch is persisted.
        let cursor = IndexerCursor {
            chain_id: self.config.chain_id.clone(),
            last_indexed_block: block_number,
            last_indexed_hash: BlockHash(raw_block.hash),
            updated_at: Utc::now(),
        };
        self.repositories.cursor().set_cursor(&cursor).await?;

        Ok(true)
    }
}
