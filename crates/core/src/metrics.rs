//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "blocks_indexed_total",
        "Total number of blocks successfully indexed"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of decode errors during block processing"
    );
    describe_counter!(
        "transfers_extracted_total",
        "Total number of transfer records extracted, by kind"
    );
    describe_counter!(
        "account_writes_total",
        "Total number of account records written, by kind (created/updated)"
    );
    describe_histogram!(
        "block_processing_duration_seconds",
        "Time taken to process a block in seconds"
    );
}

/// Record a successfully indexed block.
pub fn record_block_indexed() {
    counter!("blocks_indexed_total").increment(1);
}

/// Record a decode error.
///
/// # Arguments
/// * `error_type` - The type of error ("event" or "extrinsic")
/// * `pallet` - The pallet name (if known)
pub fn record_decode_error(error_type: &str, pallet: &str) {
    counter!("decode_errors_total", "type" => error_type.to_string(), "pallet" => pallet.to_string())
        .increment(1);
}

/// Record extracted transfer records.
///
/// # Arguments
/// * `kind` - "system_token", "appchain_to_near", "near_to_appchain", or
///   "upward_message"
/// * `count` - Number of records extracted
pub fn record_transfers_extracted(kind: &str, count: u64) {
    counter!("transfers_extracted_total", "kind" => kind.to_string()).increment(count);
}

/// Record an account write.
///
/// # Arguments
/// * `kind` - "created" or "updated"
pub fn record_account_write(kind: &str) {
    counter!("account_writes_total", "kind" => kind.to_string()).increment(1);
}

/// Record block processing duration.
pub fn record_block_processing_duration(duration_secs: f64) {
    histogram!("block_processing_duration_seconds").record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_block_processing_duration(duration);
    }
}
