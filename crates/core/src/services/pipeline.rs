//! Per-block ingestion pipeline.
//!
//! Transforms one raw finalized block into its full set of normalized
//! records and persists them. Extraction is a pure function of the raw
//! block, so any failure leaves storage untouched and the block can be
//! retried from scratch with an identical outcome.
//!
//! Persistence order matters for partial-failure replays: the block record
//! is written first (standalone), then every dependent record in one
//! transaction, then account updates.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{DomainError, DomainResult, IndexerResult};
use crate::metrics::{
    ProcessingTimer, record_account_write, record_block_indexed, record_decode_error,
    record_transfers_extracted,
};
use crate::models::{Block, Event, Extrinsic};
use crate::ports::{AccountStateQuery, BlockRecords, RawBlock, RawEvent, Repositories};
use crate::services::accounts::{TouchedAccounts, reconcile_accounts};
use crate::services::classify::{
    self, Route as EventRoute, detect_inbound_transfer, detect_outbound_transfer,
    detect_system_token_transfer, detect_upward_messages,
};
use crate::services::correlate::{flatten_calls, wrap_extrinsics};

/// Pipeline configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    /// First block at which bridge activity exists on chain. Bridge and
    /// upward-message detectors are skipped below it; generic event records
    /// are still produced.
    pub bridge_start_block: u64,
}

/// The per-block ingestion pipeline.
///
/// Generic over the repository set and the live account-state query so the
/// domain logic can be exercised against in-memory fakes.
pub struct BlockPipeline<R: ?Sized, Q: ?Sized> {
    config: PipelineConfig,
    repositories: Arc<R>,
    query: Arc<Q>,
}

impl<R, Q> BlockPipeline<R, Q>
where
    R: Repositories + ?Sized,
    Q: AccountStateQuery + ?Sized,
{
    pub fn new(config: PipelineConfig, repositories: Arc<R>, query: Arc<Q>) -> Self {
        Self {
            config,
            repositories,
            query,
        }
    }

    /// Process one finalized block end to end.
    ///
    /// Extract, reconcile accounts, persist. Any error aborts before the
    /// dependent-record transaction commits; re-processing the same block
    /// later produces identical records.
    pub async fn process(&self, raw: &RawBlock) -> IndexerResult<()> {
        let _timer = ProcessingTimer::new();

        let block = build_block(raw);
        let (mut records, touched) = extract_records(raw, block.timestamp, &self.config)?;

        debug!(
            number = block.number,
            extrinsics = records.extrinsics.len(),
            events = records.events.len(),
            accounts_touched = touched.len(),
            "extracted block records"
        );

        // Block first so every dependent record's foreign key resolves even
        // if the batch below fails and the block is replayed.
        self.repositories.blocks().insert_block(&block).await?;

        let outcome =
            reconcile_accounts(&self.repositories, &self.query, &touched, block.timestamp).await?;
        let updated = outcome.updated;
        records.new_accounts = outcome.created;

        record_transfers_extracted("system_token", records.system_token_transfers.len() as u64);
        record_transfers_extracted(
            "appchain_to_near",
            records.appchain_to_near_transfers.len() as u64,
        );
        record_transfers_extracted(
            "near_to_appchain",
            records.near_to_appchain_transfers.len() as u64,
        );
        record_transfers_extracted("upward_message", records.upward_messages.len() as u64);

        self.repositories.persist_records_atomic(&records).await?;
        for _ in &records.new_accounts {
            record_account_write("created");
        }

        for account in &updated {
            self.repositories.accounts().save_account(account).await?;
            record_account_write("updated");
        }

        record_block_indexed();
        info!(
            number = block.number,
            hash = %block.hash,
            extrinsics = block.extrinsic_count,
            events = block.event_count,
            accounts_created = records.new_accounts.len(),
            accounts_updated = updated.len(),
            "block indexed"
        );
        Ok(())
    }
}

/// Build the block header record.
fn build_block(raw: &RawBlock) -> Block {
    Block {
        number: raw.number,
        hash: raw.hash.into(),
        parent_hash: raw.parent_hash.into(),
        spec_version: raw.spec_version,
        timestamp: block_timestamp(raw),
        extrinsic_count: raw.extrinsics.len() as u32,
        event_count: raw.events.len() as u32,
    }
}

/// Block timestamp from the Timestamp pallet, if the block carried one.
///
/// No wall-clock fallback: a missing timestamp stays `None` so replays are
/// byte-identical.
fn block_timestamp(raw: &RawBlock) -> Option<DateTime<Utc>> {
    raw.timestamp
        .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
}

/// Extract every derived record of the block.
///
/// Pure with respect to storage: nothing here does I/O, so a failure
/// discards only in-memory state.
fn extract_records(
    raw: &RawBlock,
    timestamp: Option<DateTime<Utc>>,
    config: &PipelineConfig,
) -> DomainResult<(BlockRecords, TouchedAccounts)> {
    let bridge_enabled = raw.number >= config.bridge_start_block;
    let block_hash = crate::models::BlockHash::from(raw.hash);

    let mut records = BlockRecords::default();
    let mut touched = TouchedAccounts::new();
    let mut outbound_sequences: HashSet<String> = HashSet::new();
    let mut inbound_sequences: HashSet<String> = HashSet::new();

    // Indexed event ids count correlated events only, so they stay
    // contiguous from 0 regardless of initialization/finalization events.
    let mut next_event_index: u32 = 0;

    for wrapped in wrap_extrinsics(raw) {
        let extrinsic_id = Extrinsic::id_for(raw.number, wrapped.index);
        let ext = wrapped.extrinsic;

        if let Some(signer) = &ext.signer {
            touched.touch(signer, None);
        }

        records.extrinsics.push(Extrinsic {
            id: extrinsic_id.clone(),
            block_number: raw.number,
            block_hash: block_hash.clone(),
            index: wrapped.index,
            hash: ext.hash.clone(),
            pallet: ext.pallet.clone(),
            call: ext.call.clone(),
            args: ext.args.clone(),
            signer: ext.signer.clone(),
            signature: ext.signature.clone(),
            nonce: decimal_or_zero(ext.nonce.as_deref(), &ext.pallet, "nonce"),
            tip: decimal_or_zero(ext.tip.as_deref(), &ext.pallet, "tip"),
            is_signed: ext.signature.is_some(),
            success: wrapped.success,
            timestamp,
        });
        records.calls.extend(flatten_calls(&extrinsic_id, ext));

        for event in wrapped.events {
            let event_index = next_event_index;
            next_event_index += 1;
            let event_id = Event::id_for(raw.number, event_index);
            records.events.push(Event {
                id: event_id.clone(),
                block_number: raw.number,
                block_hash: block_hash.clone(),
                index: event_index,
                extrinsic_id: extrinsic_id.clone(),
                pallet: event.pallet.clone(),
                name: event.name.clone(),
                data: event.data.clone(),
            });

            match classify::route(&event.pallet, &event.name) {
                EventRoute::SystemTokenTransfer => {
                    let transfer =
                        detect_system_token_transfer(event, event_id, &extrinsic_id, timestamp)?;
                    touched.touch(&transfer.from, None);
                    touched.touch(&transfer.to, Some(transfer.from.as_str()));
                    records.system_token_transfers.push(transfer);
                }
                EventRoute::OutboundBridge(kind) if bridge_enabled => {
                    let transfer =
                        detect_outbound_transfer(kind, event, &extrinsic_id, timestamp)?;
                    if !outbound_sequences.insert(transfer.id.clone()) {
                        return Err(DomainError::DuplicateSequence(transfer.id));
                    }
                    touched.touch(&transfer.sender, None);
                    records.appchain_to_near_transfers.push(transfer);
                }
                EventRoute::InboundBridge(kind) if bridge_enabled => {
                    let transfer = detect_inbound_transfer(kind, event, &extrinsic_id, timestamp)?;
                    if !inbound_sequences.insert(transfer.id.clone()) {
                        return Err(DomainError::DuplicateSequence(transfer.id));
                    }
                    touched.touch(&transfer.receiver, Some(transfer.sender.as_str()));
                    records.near_to_appchain_transfers.push(transfer);
                }
                // Committed batches are scanned block-wide below; they can
                // land in any dispatch phase.
                EventRoute::UpwardMessages => {}
                EventRoute::OutboundBridge(_) | EventRoute::InboundBridge(_) => {
                    debug!(
                        block = raw.number,
                        event = %event.name,
                        "bridge event before start block, detector skipped"
                    );
                }
                EventRoute::Generic => {}
            }
        }
    }

    if bridge_enabled {
        for event in &raw.events {
            if classify::route(&event.pallet, &event.name) != EventRoute::UpwardMessages {
                continue;
            }
            let extrinsic_id = committing_extrinsic_id(raw.number, event);
            let messages =
                detect_upward_messages(event, raw.number, timestamp, extrinsic_id.as_deref())?;
            records.upward_messages.extend(messages);
        }
    }

    Ok((records, touched))
}

/// Extrinsic id a `Committed` event belongs to, if it was emitted while
/// applying one.
fn committing_extrinsic_id(block_number: u64, event: &RawEvent) -> Option<String> {
    match event.phase {
        crate::ports::EventPhase::ApplyExtrinsic(idx) => {
            Some(Extrinsic::id_for(block_number, idx))
        }
        _ => None,
    }
}

/// Decode an optional decimal string, falling back to zero.
///
/// Nonce and tip are incidental metadata; a malformed value is logged and
/// counted but never fails the block.
fn decimal_or_zero<T>(raw: Option<&str>, pallet: &str, field: &'static str) -> T
where
    T: std::str::FromStr + Default,
{
    match raw {
        None => T::default(),
        Some(s) => match s.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(pallet, field, value = s, "unparsable field, defaulting to zero");
                record_decode_error(field, pallet);
                T::default()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BridgeAsset, OutboundBridgeKind};
    use crate::ports::{AccountState, EventPhase, RawExtrinsic};
    use crate::testing::{MemoryAccountStateQuery, MemoryRepositories};
    use serde_json::json;

    fn extrinsic(index: u32, signer: Option<&str>) -> RawExtrinsic {
        RawExtrinsic {
            index,
            hash: format!("0xe{:02x}", index),
            pallet: "Balances".to_string(),
            call: "transfer_keep_alive".to_string(),
            args: json!({"dest": "bob", "value": "50"}),
            sub_calls: vec![],
            signer: signer.map(str::to_string),
            signature: signer.map(|_| "0xsig".to_string()),
            nonce: Some("7".to_string()),
            tip: Some("0".to_string()),
        }
    }

    fn event(index: u32, extrinsic: u32, pallet: &str, name: &str, data: serde_json::Value) -> RawEvent {
        RawEvent {
            index,
            phase: EventPhase::ApplyExtrinsic(extrinsic),
            pallet: pallet.to_string(),
            name: name.to_string(),
            data,
        }
    }

    fn block(number: u64, extrinsics: Vec<RawExtrinsic>, events: Vec<RawEvent>) -> RawBlock {
        RawBlock {
            number,
            hash: [number as u8; 32],
            parent_hash: [number.wrapping_sub(1) as u8; 32],
            spec_version: 100,
            timestamp: Some(1_700_000_000_000),
            extrinsics,
            events,
        }
    }

    fn transfer_block() -> RawBlock {
        block(
            100,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(0, 0, "Balances", "Transfer", json!(["alice", "bob", "50"])),
                event(1, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        )
    }

    fn pipeline(
        config: PipelineConfig,
    ) -> (
        BlockPipeline<MemoryRepositories, MemoryAccountStateQuery>,
        Arc<MemoryRepositories>,
        Arc<MemoryAccountStateQuery>,
    ) {
        let repositories = Arc::new(MemoryRepositories::new());
        let query = Arc::new(MemoryAccountStateQuery::new());
        let pipeline = BlockPipeline::new(config, Arc::clone(&repositories), Arc::clone(&query));
        (pipeline, repositories, query)
    }

    #[tokio::test]
    async fn native_transfer_block_produces_full_record_set() {
        let (pipeline, repositories, query) = pipeline(PipelineConfig::default());
        query
            .set_state("alice", AccountState { nonce: 8, free: 950, ..Default::default() })
            .await;
        query
            .set_state("bob", AccountState { free: 50, ..Default::default() })
            .await;

        pipeline.process(&transfer_block()).await.unwrap();

        let block = repositories.blocks().get_block(100).await.unwrap().unwrap();
        assert_eq!(block.extrinsic_count, 1);
        assert_eq!(block.event_count, 2);
        assert!(block.timestamp.is_some());

        let ext = repositories
            .extrinsics()
            .get_extrinsic("100-0")
            .await
            .unwrap()
            .unwrap();
        assert!(ext.success);
        assert!(ext.is_signed);
        assert_eq!(ext.nonce, 7);
        assert_eq!(ext.signer.as_deref(), Some("alice"));

        // One call record for the plain top-level call.
        let calls = repositories.all_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "100-0-0");

        // Generic event records for both events, keyed by global index.
        assert!(repositories.events().get_event("100-0").await.unwrap().is_some());
        assert!(repositories.events().get_event("100-1").await.unwrap().is_some());

        let transfers = repositories.all_system_token_transfers().await;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].id, "100-0");
        assert_eq!(transfers[0].from, "alice");
        assert_eq!(transfers[0].to, "bob");
        assert_eq!(transfers[0].amount, 50);
        assert_eq!(transfers[0].extrinsic_id, "100-0");

        // Both parties reconciled; recipient annotated with its creator.
        let alice = repositories.accounts().get_account("alice").await.unwrap().unwrap();
        assert_eq!(alice.nonce, 8);
        assert_eq!(alice.created_by, None);
        let bob = repositories.accounts().get_account("bob").await.unwrap().unwrap();
        assert_eq!(bob.free_balance, 50);
        assert_eq!(bob.created_by.as_deref(), Some("alice"));
        assert_eq!(bob.created_at, block.timestamp);
    }

    #[tokio::test]
    async fn reprocessing_a_block_is_idempotent() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());

        pipeline.process(&transfer_block()).await.unwrap();
        let first = repositories.snapshot().await;
        pipeline.process(&transfer_block()).await.unwrap();
        let second = repositories.snapshot().await;

        assert_eq!(first, second);
    }

    // Event ids count correlated events only; runtime events emitted during
    // block initialization must not shift them off the 0.. range.
    #[tokio::test]
    async fn initialization_events_do_not_shift_event_ids() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let raw = block(
            100,
            vec![extrinsic(0, Some("alice"))],
            vec![
                RawEvent {
                    index: 0,
                    phase: EventPhase::Initialization,
                    pallet: "Session".to_string(),
                    name: "NewSession".to_string(),
                    data: json!([]),
                },
                event(1, 0, "Balances", "Transfer", json!(["alice", "bob", "50"])),
                event(2, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        );

        pipeline.process(&raw).await.unwrap();

        let first = repositories.events().get_event("100-0").await.unwrap().unwrap();
        assert_eq!(first.name, "Transfer");
        assert_eq!(first.index, 0);
        assert!(repositories.events().get_event("100-1").await.unwrap().is_some());
        assert!(repositories.events().get_event("100-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_extrinsic_is_recorded_as_unsuccessful() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let raw = block(
            5,
            vec![extrinsic(0, Some("alice"))],
            vec![event(0, 0, "System", "ExtrinsicFailed", json!([]))],
        );

        pipeline.process(&raw).await.unwrap();

        let ext = repositories.extrinsics().get_extrinsic("5-0").await.unwrap().unwrap();
        assert!(!ext.success);
    }

    #[tokio::test]
    async fn unparsable_nonce_and_tip_default_to_zero() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let mut ext = extrinsic(0, Some("alice"));
        ext.nonce = Some("not-a-number".to_string());
        ext.tip = None;
        let raw = block(6, vec![ext], vec![event(0, 0, "System", "ExtrinsicSuccess", json!([]))]);

        pipeline.process(&raw).await.unwrap();

        let ext = repositories.extrinsics().get_extrinsic("6-0").await.unwrap().unwrap();
        assert_eq!(ext.nonce, 0);
        assert_eq!(ext.tip, 0);
    }

    #[tokio::test]
    async fn bridge_detectors_gated_by_start_block() {
        let config = PipelineConfig {
            bridge_start_block: 1000,
        };
        let (pipeline, repositories, _query) = pipeline(config);
        let raw = block(
            999,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(
                    0,
                    0,
                    "OctopusBridge",
                    "Locked",
                    json!(["alice", "receiver.near", "1000", "10", "1"]),
                ),
                event(
                    1,
                    0,
                    "OctopusUpwardMessages",
                    "Committed",
                    json!([[{"nonce": 1, "payload": "0xaa"}]]),
                ),
                event(2, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        );

        pipeline.process(&raw).await.unwrap();

        // Generic records still produced, detectors skipped.
        assert!(repositories.events().get_event("999-0").await.unwrap().is_some());
        assert!(repositories.all_appchain_to_near_transfers().await.is_empty());
        assert!(repositories.all_upward_messages().await.is_empty());
    }

    #[tokio::test]
    async fn outbound_transfer_detected_at_and_above_start_block() {
        let config = PipelineConfig {
            bridge_start_block: 1000,
        };
        let (pipeline, repositories, _query) = pipeline(config);
        let raw = block(
            1000,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(
                    0,
                    0,
                    "OctopusBridge",
                    "Locked",
                    json!(["alice", "receiver.near", "1000", "10", "12\\34"]),
                ),
                event(1, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        );

        pipeline.process(&raw).await.unwrap();

        let transfers = repositories.all_appchain_to_near_transfers().await;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].id, "1234");
        assert_eq!(transfers[0].kind, OutboundBridgeKind::Locked);
        assert_eq!(transfers[0].asset, BridgeAsset::Fungible { amount: 1000 });
        assert_eq!(transfers[0].extrinsic_id, "1000-0");
    }

    #[tokio::test]
    async fn duplicate_sequence_in_one_block_is_fatal() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let raw = block(
            10,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(
                    0,
                    0,
                    "OctopusBridge",
                    "Locked",
                    json!(["alice", "a.near", "1", "0", "42"]),
                ),
                event(
                    1,
                    0,
                    "OctopusBridge",
                    "Locked",
                    json!(["alice", "b.near", "2", "0", "4\\2"]),
                ),
                event(2, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        );

        let err = pipeline.process(&raw).await.unwrap_err();
        assert!(err.to_string().contains("Duplicate bridge sequence"));
        // Extraction failed before any dependent record was written.
        assert!(repositories.all_appchain_to_near_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn same_sequence_in_both_directions_is_allowed() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let raw = block(
            10,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(
                    0,
                    0,
                    "OctopusBridge",
                    "Locked",
                    json!(["alice", "a.near", "1", "0", "42"]),
                ),
                event(
                    1,
                    0,
                    "OctopusBridge",
                    "Unlocked",
                    json!(["a.near", "alice", "1", "42"]),
                ),
                event(2, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        );

        pipeline.process(&raw).await.unwrap();
        assert_eq!(repositories.all_appchain_to_near_transfers().await.len(), 1);
        assert_eq!(repositories.all_near_to_appchain_transfers().await.len(), 1);
    }

    // A sequence reused by a later block must fail that block, not
    // overwrite the stored transfer.
    #[tokio::test]
    async fn sequence_reuse_across_blocks_is_fatal() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let locked = |n: u64| {
            block(
                n,
                vec![extrinsic(0, Some("alice"))],
                vec![
                    event(
                        0,
                        0,
                        "OctopusBridge",
                        "Locked",
                        json!(["alice", "a.near", "1", "0", "42"]),
                    ),
                    event(1, 0, "System", "ExtrinsicSuccess", json!([])),
                ],
            )
        };

        pipeline.process(&locked(10)).await.unwrap();
        pipeline.process(&locked(11)).await.unwrap_err();

        let transfers = repositories.all_appchain_to_near_transfers().await;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].extrinsic_id, "10-0");
    }

    #[tokio::test]
    async fn committed_batch_detected_in_finalization_phase() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let mut committed = event(
            2,
            0,
            "OctopusUpwardMessages",
            "Committed",
            json!([[
                {"nonce": 5, "payload": "0xaa"},
                {"nonce": 6, "payload": "0xbb"}
            ]]),
        );
        committed.phase = EventPhase::Finalization;
        let raw = block(
            20,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(0, 0, "System", "ExtrinsicSuccess", json!([])),
                committed,
            ],
        );

        pipeline.process(&raw).await.unwrap();

        // No generic event record (non-extrinsic phase), but the batch is
        // fanned out in order with no extrinsic attribution.
        assert!(repositories.events().get_event("20-2").await.unwrap().is_none());
        let messages = repositories.all_upward_messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "20-2-0");
        assert_eq!(messages[1].id, "20-2-1");
        assert_eq!(messages[0].extrinsic_id, None);
    }

    #[tokio::test]
    async fn committed_batch_in_extrinsic_phase_keeps_attribution() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let raw = block(
            21,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(
                    0,
                    0,
                    "OctopusUpwardMessages",
                    "Committed",
                    json!([[{"nonce": 9, "payload": "0xcc"}]]),
                ),
                event(1, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        );

        pipeline.process(&raw).await.unwrap();

        // The Committed event also gets its generic record.
        assert!(repositories.events().get_event("21-0").await.unwrap().is_some());
        let messages = repositories.all_upward_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].extrinsic_id.as_deref(), Some("21-0"));
    }

    #[tokio::test]
    async fn malformed_transfer_aborts_the_block() {
        let (pipeline, repositories, _query) = pipeline(PipelineConfig::default());
        let raw = block(
            30,
            vec![extrinsic(0, Some("alice"))],
            vec![
                event(0, 0, "Balances", "Transfer", json!(["alice", "bob"])),
                event(1, 0, "System", "ExtrinsicSuccess", json!([])),
            ],
        );

        assert!(pipeline.process(&raw).await.is_err());
        assert!(repositories.blocks().get_block(30).await.unwrap().is_none());
    }
}
