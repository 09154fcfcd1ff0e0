//! Substrate RPC client with dynamic metadata decoding.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use subxt::backend::chain_head::{ChainHeadBackend, ChainHeadBackendBuilder};
use subxt::backend::rpc::RpcClient;
use subxt::blocks::Block;
use subxt::utils::AccountId32;
use subxt::{OnlineClient, PolkadotConfig};
use tracing::{debug, instrument, trace, warn};

use pulpo_core::error::{ChainError, ChainResult};
use pulpo_core::metrics::record_decode_error;
use pulpo_core::models::BlockHash;
use pulpo_core::ports::{
    AccountState, AccountStateQuery, BlockSource, EventPhase, FinalizedBlockStream, FinalizedHead,
    RawBlock, RawEvent, RawExtrinsic,
};

use crate::decode::{
    composite_to_json, extract_sub_calls, parse_timestamp_from_debug, try_decode_compact_u64,
    value_to_json,
};

/// Configuration for the Substrate client.
#[derive(Debug, Clone)]
pub struct SubstrateClientConfig {
    /// WebSocket URL (e.g., "ws://localhost:9944").
    pub ws_url: String,
}

pub type SubstrateBlock = Block<PolkadotConfig, OnlineClient<PolkadotConfig>>;

impl Default for SubstrateClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:9944".to_string(),
        }
    }
}

/// Substrate client adapter implementing the BlockSource and
/// AccountStateQuery ports.
pub struct SubstrateClient {
    client: OnlineClient<PolkadotConfig>,
}

impl SubstrateClient {
    /// Connect to a Substrate node.
    #[instrument(skip_all, fields(url = %config.ws_url))]
    pub async fn connect(config: SubstrateClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let rpc_client = RpcClient::from_url(&config.ws_url)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let backend: ChainHeadBackend<PolkadotConfig> =
            ChainHeadBackendBuilder::default().build_with_background_driver(rpc_client.clone());
        let client = OnlineClient::<PolkadotConfig>::from_backend(Arc::new(backend))
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        debug!("Connected successfully");

        Ok(Self { client })
    }
}

#[async_trait]
impl BlockSource for SubstrateClient {
    async fn genesis_hash(&self) -> ChainResult<BlockHash> {
        let hash = self.client.genesis_hash();
        Ok(BlockHash(hash.0))
    }

    async fn finalized_head(&self) -> ChainResult<FinalizedHead> {
        let head = self
            .client
            .blocks()
            .at_latest()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        Ok(FinalizedHead {
            number: head.number() as u64,
            hash: head.hash().into(),
        })
    }

    async fn subscribe_finalized(&self) -> ChainResult<FinalizedBlockStream> {
        let subscription = self
            .client
            .blocks()
            .subscribe_finalized()
            .await
            .map_err(|e| ChainError::SubscriptionError(e.to_string()))?;

        let spec_version = self.client.runtime_version().spec_version;

        let stream = subscription.then(move |result| async move {
            match result {
                Ok(block) => {
                    let extrinsics = decode_extrinsics(&block).await?;
                    let events = decode_events(&block).await?;
                    let timestamp = get_block_timestamp(&block).await?;

                    Ok(RawBlock {
                        number: block.number() as u64,
                        hash: block.hash().into(),
                        parent_hash: block.header().parent_hash.into(),
                        spec_version,
                        timestamp,
                        extrinsics,
                        events,
                    })
                }
                Err(e) => Err(ChainError::SubscriptionError(e.to_string())),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn runtime_version(&self) -> ChainResult<u32> {
        let version = self.client.runtime_version();
        Ok(version.spec_version)
    }
}

// =============================================================================
// Account state
// =============================================================================

#[async_trait]
impl AccountStateQuery for SubstrateClient {
    async fn account_state(&self, address: &str) -> ChainResult<AccountState> {
        let account = AccountId32::from_str(address).map_err(|e| {
            ChainError::AccountStateError {
                address: address.to_string(),
                message: format!("invalid address: {}", e),
            }
        })?;

        let key = subxt::dynamic::storage(
            "System",
            "Account",
            vec![subxt::dynamic::Value::from_bytes(account.0)],
        );

        let storage = self
            .client
            .storage()
            .at_latest()
            .await
            .map_err(|e| ChainError::AccountStateError {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let entry = storage
            .fetch(&key)
            .await
            .map_err(|e| ChainError::AccountStateError {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        // No storage entry means the account does not exist yet; the
        // reconciler treats that as all-zero state, not an error.
        let Some(thunk) = entry else {
            return Ok(AccountState::default());
        };

        let value = thunk.to_value().map_err(|e| ChainError::AccountStateError {
            address: address.to_string(),
            message: e.to_string(),
        })?;

        parse_account_state(&value_to_json(&value)).ok_or_else(|| {
            ChainError::AccountStateError {
                address: address.to_string(),
                message: "unexpected System.Account shape".to_string(),
            }
        })
    }
}

/// Parse the JSON rendering of `System.Account` into [`AccountState`].
///
/// The appchain runtime's `AccountData` carries `misc_frozen`/`fee_frozen`;
/// newer runtimes collapse both into a single `frozen` field, which is
/// mapped to `misc_frozen` with `fee_frozen` zero.
fn parse_account_state(value: &serde_json::Value) -> Option<AccountState> {
    let nonce = json_u128(value.get("nonce")?)? as u64;
    let data = value.get("data")?;
    let free = json_u128(data.get("free")?)?;
    let reserved = json_u128(data.get("reserved")?)?;

    let (misc_frozen, fee_frozen) = match (data.get("misc_frozen"), data.get("fee_frozen")) {
        (Some(misc), Some(fee)) => (json_u128(misc)?, json_u128(fee)?),
        _ => (data.get("frozen").and_then(json_u128).unwrap_or(0), 0),
    };

    Some(AccountState {
        nonce,
        free,
        reserved,
        misc_frozen,
        fee_frozen,
    })
}

/// Numbers in decoded JSON arrive as decimal strings (wide primitives) or
/// plain numbers.
fn json_u128(value: &serde_json::Value) -> Option<u128> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}

// =============================================================================
// Block decoding helpers
// =============================================================================

/// Decode events from a block.
async fn decode_events(block: &SubstrateBlock) -> ChainResult<Vec<RawEvent>> {
    let events = block
        .events()
        .await
        .map_err(|e| ChainError::RpcError(e.to_string()))?;

    let mut raw_events = Vec::new();

    for (index, event) in events.iter().enumerate() {
        match event {
            Ok(ev) => {
                let pallet = ev.pallet_name().to_string();
                let name = ev.variant_name().to_string();

                let data = ev
                    .field_values()
                    .map(|composite| composite_to_json(&composite))
                    .unwrap_or(serde_json::Value::Null);

                let phase = match ev.phase() {
                    subxt::events::Phase::ApplyExtrinsic(idx) => EventPhase::ApplyExtrinsic(idx),
                    subxt::events::Phase::Initialization => EventPhase::Initialization,
                    subxt::events::Phase::Finalization => EventPhase::Finalization,
                };

                raw_events.push(RawEvent {
                    index: index as u32,
                    phase,
                    pallet,
                    name,
                    data,
                });
            }
            Err(e) => {
                trace!(index, error = ?e, "Failed to decode event");
                record_decode_error("event", "unknown");
            }
        }
    }

    Ok(raw_events)
}

/// Decode extrinsics from a block.
async fn decode_extrinsics(block: &SubstrateBlock) -> ChainResult<Vec<RawExtrinsic>> {
    let extrinsics = block
        .extrinsics()
        .await
        .map_err(|e| ChainError::RpcError(e.to_string()))?;

    let mut raw_extrinsics = Vec::new();

    for (index, ext) in extrinsics.iter().enumerate() {
        let pallet = ext
            .pallet_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "Unknown".to_string());
        let call = ext
            .variant_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let signer = ext.address_bytes().and_then(|bytes| {
            // MultiAddress::Id is a one-byte discriminant plus 32 bytes;
            // a bare AccountId32 is 32 bytes.
            let account = match bytes.len() {
                32 => <[u8; 32]>::try_from(bytes).ok(),
                33 => <[u8; 32]>::try_from(&bytes[1..]).ok(),
                _ => {
                    trace!(index, len = bytes.len(), "Invalid signer address length");
                    None
                }
            };
            account.map(|arr| AccountId32(arr).to_string())
        });

        let signature = ext
            .signature_bytes()
            .map(|bytes| format!("0x{}", hex::encode(bytes)));

        let (nonce, tip) = match ext.transaction_extensions() {
            Some(exts) => (
                exts.nonce().map(|n| n.to_string()),
                exts.tip().map(|t| t.to_string()),
            ),
            None => (None, None),
        };

        let args = ext
            .field_values()
            .map(|composite| composite_to_json(&composite))
            .unwrap_or(serde_json::Value::Null);

        let sub_calls = extract_sub_calls(&pallet, &call, &args);

        raw_extrinsics.push(RawExtrinsic {
            index: index as u32,
            hash: format!("0x{}", hex::encode(ext.hash().0)),
            pallet,
            call,
            args,
            sub_calls,
            signer,
            signature,
            nonce,
            tip,
        });
    }

    Ok(raw_extrinsics)
}

/// Get timestamp from Timestamp.set inherent.
async fn get_block_timestamp(block: &SubstrateBlock) -> ChainResult<Option<u64>> {
    let extrinsics = block
        .extrinsics()
        .await
        .map_err(|e| ChainError::RpcError(e.to_string()))?;

    for ext in extrinsics.iter() {
        let pallet = match ext.pallet_name() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let call = match ext.variant_name() {
            Ok(c) => c,
            Err(_) => continue,
        };

        if pallet == "Timestamp" && call == "set" {
            if let Ok(values) = ext.field_values() {
                let value_str = format!("{:?}", values);
                if let Some(ts) = parse_timestamp_from_debug(&value_str) {
                    return Ok(Some(ts));
                }

                warn!(
                    block = block.number(),
                    "Could not parse timestamp from Timestamp.set: {:?}", values
                );
            }

            let bytes = ext.bytes();
            if bytes.len() >= 5
                && let Some(ts) = try_decode_compact_u64(&bytes[2..])
            {
                return Ok(Some(ts));
            }
        }
    }

    Ok(None)
}
