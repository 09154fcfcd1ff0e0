//! Event classification and transfer detection.
//!
//! Every correlated event yields a generic [`Event`](crate::models::Event)
//! record; in addition, a fixed `(pallet, event)` routing table dispatches
//! recognized events to exactly one transfer detector. The table is
//! exhaustive: "no detector" is the explicit [`Route::Generic`] case, not an
//! implicit fall-through.
//!
//! Each detector destructures the event's positional argument tuple with the
//! arity and field order defined by the emitting pallet's event signature
//! (documented per method below). An arity mismatch or an unparsable amount
//! fails the whole block rather than emitting a malformed record.

use chrono::{DateTime, Utc};

use crate::error::{DomainError, DomainResult};
use crate::models::{
    AppchainToNearTransfer, BridgeAsset, InboundBridgeKind, NearToAppchainTransfer,
    OutboundBridgeKind, SystemTokenTransfer, UpwardMessage,
};
use crate::ports::RawEvent;

// =============================================================================
// Routing
// =============================================================================

/// Where an event is routed after its generic record is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `Balances.Transfer` → native-token transfer detector.
    SystemTokenTransfer,
    /// Octopus bridge event, appchain → NEAR direction.
    OutboundBridge(OutboundBridgeKind),
    /// Octopus bridge event, NEAR → appchain direction.
    InboundBridge(InboundBridgeKind),
    /// `OctopusUpwardMessages.Committed` → upward-message fan-out.
    UpwardMessages,
    /// No detector; the generic record is all that is produced.
    Generic,
}

/// Look up the detector for a `(pallet, event)` pair.
pub fn route(pallet: &str, name: &str) -> Route {
    match (pallet, name) {
        ("Balances", "Transfer") => Route::SystemTokenTransfer,
        ("OctopusBridge", "Locked") => Route::OutboundBridge(OutboundBridgeKind::Locked),
        ("OctopusBridge", "Nep141Burned") => {
            Route::OutboundBridge(OutboundBridgeKind::Nep141Burned)
        }
        ("OctopusBridge", "NonfungibleLocked") => {
            Route::OutboundBridge(OutboundBridgeKind::NonfungibleLocked)
        }
        ("OctopusBridge", "Unlocked") => Route::InboundBridge(InboundBridgeKind::Unlocked),
        ("OctopusBridge", "Nep141Minted") => {
            Route::InboundBridge(InboundBridgeKind::Nep141Minted)
        }
        ("OctopusBridge", "NonfungibleUnlocked") => {
            Route::InboundBridge(InboundBridgeKind::NonfungibleUnlocked)
        }
        ("OctopusUpwardMessages", "Committed") => Route::UpwardMessages,
        _ => Route::Generic,
    }
}

// =============================================================================
// Sequence sanitization
// =============================================================================

/// Strip every literal backslash from a bridge sequence value.
///
/// Sequences arrive embedded with escape characters (a serialization
/// artifact of the on-chain human-readable encoding); the stripped form is
/// the transfer's identifier. Sanitizing an already-clean value is a no-op.
pub fn sanitize_sequence(raw: &str) -> String {
    raw.replace('\\', "")
}

// =============================================================================
// Detectors
// =============================================================================

/// Detect a native-token transfer from a `Balances.Transfer` event.
///
/// Signature: `Transfer(from, to, amount)`.
pub fn detect_system_token_transfer(
    event: &RawEvent,
    id: String,
    extrinsic_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> DomainResult<SystemTokenTransfer> {
    let args = tuple(event, "Balances", "Transfer", 3)?;

    Ok(SystemTokenTransfer {
        id,
        from: parse_account(&args[0])?,
        to: parse_account(&args[1])?,
        amount: parse_amount(&args[2])?,
        timestamp,
        extrinsic_id: extrinsic_id.to_string(),
    })
}

/// Detect an outbound (appchain → NEAR) bridge transfer.
///
/// Signatures:
/// - `Locked(sender, receiver, amount, fee, sequence)`
/// - `Nep141Burned(asset_id, sender, receiver, amount, fee, sequence)`
/// - `NonfungibleLocked(collection, item, sender, receiver, fee, sequence)`
///
/// The fee field is protocol overhead and not part of the record.
pub fn detect_outbound_transfer(
    kind: OutboundBridgeKind,
    event: &RawEvent,
    extrinsic_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> DomainResult<AppchainToNearTransfer> {
    let (sender, receiver, asset, raw_sequence) = match kind {
        OutboundBridgeKind::Locked => {
            let args = tuple(event, "OctopusBridge", "Locked", 5)?;
            (
                parse_account(&args[0])?,
                parse_string(&args[1])?,
                BridgeAsset::Fungible {
                    amount: parse_amount(&args[2])?,
                },
                &args[4],
            )
        }
        OutboundBridgeKind::Nep141Burned => {
            let args = tuple(event, "OctopusBridge", "Nep141Burned", 6)?;
            (
                parse_account(&args[1])?,
                parse_string(&args[2])?,
                BridgeAsset::Nep141 {
                    asset_id: parse_u32(&args[0])?,
                    amount: parse_amount(&args[3])?,
                },
                &args[5],
            )
        }
        OutboundBridgeKind::NonfungibleLocked => {
            let args = tuple(event, "OctopusBridge", "NonfungibleLocked", 6)?;
            (
                parse_account(&args[2])?,
                parse_string(&args[3])?,
                BridgeAsset::Nonfungible {
                    collection: parse_amount(&args[0])?,
                    item: parse_amount(&args[1])?,
                },
                &args[5],
            )
        }
    };

    let (id, sequence) = parse_sequence(raw_sequence)?;
    Ok(AppchainToNearTransfer {
        id,
        sender,
        receiver,
        kind,
        asset,
        sequence,
        timestamp,
        extrinsic_id: extrinsic_id.to_string(),
    })
}

/// Detect an inbound (NEAR → appchain) bridge transfer.
///
/// Signatures:
/// - `Unlocked(sender, receiver, amount, sequence)`
/// - `Nep141Minted(asset_id, sender, receiver, amount, sequence)`
/// - `NonfungibleUnlocked(collection, item, sender, receiver, sequence)`
pub fn detect_inbound_transfer(
    kind: InboundBridgeKind,
    event: &RawEvent,
    extrinsic_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> DomainResult<NearToAppchainTransfer> {
    let (sender, receiver, asset, raw_sequence) = match kind {
        InboundBridgeKind::Unlocked => {
            let args = tuple(event, "OctopusBridge", "Unlocked", 4)?;
            (
                parse_string(&args[0])?,
                parse_account(&args[1])?,
                BridgeAsset::Fungible {
                    amount: parse_amount(&args[2])?,
                },
                &args[3],
            )
        }
        InboundBridgeKind::Nep141Minted => {
            let args = tuple(event, "OctopusBridge", "Nep141Minted", 5)?;
            (
                parse_string(&args[1])?,
                parse_account(&args[2])?,
                BridgeAsset::Nep141 {
                    asset_id: parse_u32(&args[0])?,
                    amount: parse_amount(&args[3])?,
                },
                &args[4],
            )
        }
        InboundBridgeKind::NonfungibleUnlocked => {
            let args = tuple(event, "OctopusBridge", "NonfungibleUnlocked", 5)?;
            (
                parse_string(&args[2])?,
                parse_account(&args[3])?,
                BridgeAsset::Nonfungible {
                    collection: parse_amount(&args[0])?,
                    item: parse_amount(&args[1])?,
                },
                &args[4],
            )
        }
    };

    let (id, sequence) = parse_sequence(raw_sequence)?;
    Ok(NearToAppchainTransfer {
        id,
        sender,
        receiver,
        kind,
        asset,
        sequence,
        timestamp,
        extrinsic_id: extrinsic_id.to_string(),
    })
}

/// Fan an `OctopusUpwardMessages.Committed` event out into one record per
/// message, preserving the batch's internal order.
///
/// Signature: `Committed(messages)` where each message is
/// `{ nonce, payload }`.
pub fn detect_upward_messages(
    event: &RawEvent,
    block_number: u64,
    timestamp: Option<DateTime<Utc>>,
    extrinsic_id: Option<&str>,
) -> DomainResult<Vec<UpwardMessage>> {
    let args = tuple(event, "OctopusUpwardMessages", "Committed", 1)?;
    let messages = args[0].as_array().ok_or_else(|| {
        DomainError::DecodingError("Committed batch is not an array".to_string())
    })?;

    messages
        .iter()
        .enumerate()
        .map(|(message_index, message)| {
            let nonce = message
                .get("nonce")
                .or_else(|| message.get(0))
                .ok_or_else(|| {
                    DomainError::DecodingError(format!(
                        "upward message {} has no nonce",
                        message_index
                    ))
                })
                .and_then(parse_u64)?;
            let payload = message
                .get("payload")
                .or_else(|| message.get(1))
                .ok_or_else(|| {
                    DomainError::DecodingError(format!(
                        "upward message {} has no payload",
                        message_index
                    ))
                })
                .and_then(parse_string)?;

            Ok(UpwardMessage {
                id: format!("{}-{}-{}", block_number, event.index, message_index),
                nonce,
                payload,
                timestamp,
                extrinsic_id: extrinsic_id.map(str::to_string),
            })
        })
        .collect()
}

// =============================================================================
// Argument tuple parsing
// =============================================================================

/// Destructure an event's data as a positional tuple of exactly
/// `expected` fields. Fails closed on arity mismatch.
fn tuple<'a>(
    event: &'a RawEvent,
    pallet: &'static str,
    name: &'static str,
    expected: usize,
) -> DomainResult<&'a [serde_json::Value]> {
    let args = event.data.as_array().ok_or_else(|| {
        DomainError::DecodingError(format!("{}.{} payload is not a tuple", pallet, name))
    })?;
    if args.len() != expected {
        return Err(DomainError::EventShape {
            pallet,
            event: name,
            expected,
            got: args.len(),
        });
    }
    Ok(args)
}

/// Parse an account id from its JSON representation.
///
/// Accepts a plain string (SS58 or hex) or the `{ "Id": … }` wrapper used
/// by `MultiAddress`.
fn parse_account(value: &serde_json::Value) -> DomainResult<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Object(obj) => obj
            .get("Id")
            .or_else(|| obj.get("id"))
            .ok_or_else(|| {
                DomainError::DecodingError(format!("unrecognized account shape: {}", value))
            })
            .and_then(parse_account),
        _ => Err(DomainError::DecodingError(format!(
            "unrecognized account shape: {}",
            value
        ))),
    }
}

/// Parse an opaque string field (NEAR account name, payload hex).
fn parse_string(value: &serde_json::Value) -> DomainResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DomainError::DecodingError(format!("expected string, got {}", value)))
}

/// Parse an amount as an arbitrary-precision unsigned integer.
///
/// JSON numbers are limited to `u64`, so large amounts arrive as decimal
/// strings; both forms are accepted. A missing or non-numeric amount is a
/// hard decode failure, never silently zeroed.
fn parse_amount(value: &serde_json::Value) -> DomainResult<u128> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(u128::from),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| DomainError::DecodingError(format!("invalid amount: {}", value)))
}

/// Parse a `u64` field.
fn parse_u64(value: &serde_json::Value) -> DomainResult<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| DomainError::DecodingError(format!("invalid u64: {}", value)))
}

/// Parse a `u32` field.
fn parse_u32(value: &serde_json::Value) -> DomainResult<u32> {
    parse_u64(value)?
        .try_into()
        .map_err(|_| DomainError::DecodingError(format!("u32 out of range: {}", value)))
}

/// Parse and sanitize a sequence field, returning the record id and the
/// numeric sequence.
fn parse_sequence(value: &serde_json::Value) -> DomainResult<(String, u64)> {
    let raw = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return Err(DomainError::DecodingError(format!(
                "invalid sequence: {}",
                value
            )));
        }
    };
    let id = sanitize_sequence(&raw);
    let sequence = id
        .parse()
        .map_err(|_| DomainError::DecodingError(format!("non-numeric sequence: {}", raw)))?;
    Ok((id, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::EventPhase;
    use serde_json::json;

    fn event(pallet: &str, name: &str, data: serde_json::Value) -> RawEvent {
        RawEvent {
            index: 3,
            phase: EventPhase::ApplyExtrinsic(0),
            pallet: pallet.to_string(),
            name: name.to_string(),
            data,
        }
    }

    #[test]
    fn routing_table_covers_all_bridge_methods() {
        assert_eq!(route("Balances", "Transfer"), Route::SystemTokenTransfer);
        assert_eq!(
            route("OctopusBridge", "Locked"),
            Route::OutboundBridge(OutboundBridgeKind::Locked)
        );
        assert_eq!(
            route("OctopusBridge", "Nep141Burned"),
            Route::OutboundBridge(OutboundBridgeKind::Nep141Burned)
        );
        assert_eq!(
            route("OctopusBridge", "NonfungibleLocked"),
            Route::OutboundBridge(OutboundBridgeKind::NonfungibleLocked)
        );
        assert_eq!(
            route("OctopusBridge", "Unlocked"),
            Route::InboundBridge(InboundBridgeKind::Unlocked)
        );
        assert_eq!(
            route("OctopusBridge", "Nep141Minted"),
            Route::InboundBridge(InboundBridgeKind::Nep141Minted)
        );
        assert_eq!(
            route("OctopusBridge", "NonfungibleUnlocked"),
            Route::InboundBridge(InboundBridgeKind::NonfungibleUnlocked)
        );
        assert_eq!(route("OctopusUpwardMessages", "Committed"), Route::UpwardMessages);
    }

    #[test]
    fn unrecognized_events_route_to_generic() {
        assert_eq!(route("Balances", "Deposit"), Route::Generic);
        assert_eq!(route("OctopusBridge", "Unknown"), Route::Generic);
        assert_eq!(route("Session", "NewSession"), Route::Generic);
    }

    #[test]
    fn sanitize_strips_every_backslash() {
        assert_eq!(sanitize_sequence("12\\34"), "1234");
        assert_eq!(sanitize_sequence("\\1\\2\\"), "12");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_sequence("12\\34");
        assert_eq!(sanitize_sequence(&once), once);
    }

    #[test]
    fn system_token_transfer_decodes() {
        let evt = event("Balances", "Transfer", json!(["alice", "bob", "50"]));
        let t = detect_system_token_transfer(&evt, "100-3".to_string(), "100-0", None).unwrap();
        assert_eq!(t.from, "alice");
        assert_eq!(t.to, "bob");
        assert_eq!(t.amount, 50);
        assert_eq!(t.extrinsic_id, "100-0");
    }

    #[test]
    fn system_token_transfer_accepts_large_amounts() {
        let max = u128::MAX.to_string();
        let evt = event("Balances", "Transfer", json!(["alice", "bob", max]));
        let t = detect_system_token_transfer(&evt, "100-3".to_string(), "100-0", None).unwrap();
        assert_eq!(t.amount, u128::MAX);
    }

    #[test]
    fn system_token_transfer_rejects_wrong_arity() {
        let evt = event("Balances", "Transfer", json!(["alice", "bob"]));
        let err = detect_system_token_transfer(&evt, "100-3".to_string(), "100-0", None)
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::EventShape {
                expected: 3,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn system_token_transfer_rejects_bad_amount() {
        let evt = event("Balances", "Transfer", json!(["alice", "bob", "not-a-number"]));
        assert!(detect_system_token_transfer(&evt, "100-3".to_string(), "100-0", None).is_err());
    }

    #[test]
    fn locked_transfer_decodes_with_sanitized_sequence() {
        let evt = event(
            "OctopusBridge",
            "Locked",
            json!(["alice", "receiver.near", "1000", "10", "12\\34"]),
        );
        let t =
            detect_outbound_transfer(OutboundBridgeKind::Locked, &evt, "100-0", None).unwrap();
        assert_eq!(t.id, "1234");
        assert_eq!(t.sequence, 1234);
        assert_eq!(t.sender, "alice");
        assert_eq!(t.receiver, "receiver.near");
        assert_eq!(t.asset, BridgeAsset::Fungible { amount: 1000 });
    }

    #[test]
    fn nep141_burned_decodes_asset_id() {
        let evt = event(
            "OctopusBridge",
            "Nep141Burned",
            json!([7, "alice", "receiver.near", "500", "5", "9"]),
        );
        let t = detect_outbound_transfer(OutboundBridgeKind::Nep141Burned, &evt, "100-0", None)
            .unwrap();
        assert_eq!(
            t.asset,
            BridgeAsset::Nep141 {
                asset_id: 7,
                amount: 500
            }
        );
        assert_eq!(t.sender, "alice");
    }

    #[test]
    fn nonfungible_locked_decodes_collection_and_item() {
        let evt = event(
            "OctopusBridge",
            "NonfungibleLocked",
            json!(["3", "11", "alice", "receiver.near", "1", "42"]),
        );
        let t = detect_outbound_transfer(
            OutboundBridgeKind::NonfungibleLocked,
            &evt,
            "100-0",
            None,
        )
        .unwrap();
        assert_eq!(
            t.asset,
            BridgeAsset::Nonfungible {
                collection: 3,
                item: 11
            }
        );
    }

    #[test]
    fn unlocked_transfer_mirrors_outbound() {
        let evt = event(
            "OctopusBridge",
            "Unlocked",
            json!(["sender.near", "bob", "250", "17"]),
        );
        let t =
            detect_inbound_transfer(InboundBridgeKind::Unlocked, &evt, "100-1", None).unwrap();
        assert_eq!(t.sender, "sender.near");
        assert_eq!(t.receiver, "bob");
        assert_eq!(t.asset, BridgeAsset::Fungible { amount: 250 });
        assert_eq!(t.id, "17");
    }

    #[test]
    fn nep141_minted_rejects_wrong_arity() {
        let evt = event("OctopusBridge", "Nep141Minted", json!([7, "s.near", "bob"]));
        let err = detect_inbound_transfer(InboundBridgeKind::Nep141Minted, &evt, "100-0", None)
            .unwrap_err();
        assert!(matches!(err, DomainError::EventShape { expected: 5, .. }));
    }

    #[test]
    fn account_id_wrapper_unwrapped() {
        let evt = event(
            "Balances",
            "Transfer",
            json!([{"Id": "alice"}, {"id": "bob"}, "1"]),
        );
        let t = detect_system_token_transfer(&evt, "1-0".to_string(), "1-0", None).unwrap();
        assert_eq!(t.from, "alice");
        assert_eq!(t.to, "bob");
    }

    #[test]
    fn upward_messages_fan_out_in_batch_order() {
        let evt = event(
            "OctopusUpwardMessages",
            "Committed",
            json!([[
                {"nonce": 5, "payload": "0xaa"},
                {"nonce": "6", "payload": "0xbb"}
            ]]),
        );
        let messages = detect_upward_messages(&evt, 100, None, Some("100-2")).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "100-3-0");
        assert_eq!(messages[0].nonce, 5);
        assert_eq!(messages[0].payload, "0xaa");
        assert_eq!(messages[1].id, "100-3-1");
        assert_eq!(messages[1].nonce, 6);
        assert_eq!(messages[1].extrinsic_id.as_deref(), Some("100-2"));
    }

    #[test]
    fn upward_messages_reject_malformed_batch() {
        let evt = event("OctopusUpwardMessages", "Committed", json!(["nope"]));
        assert!(detect_upward_messages(&evt, 100, None, None).is_err());

        let evt = event(
            "OctopusUpwardMessages",
            "Committed",
            json!([[{"payload": "0xaa"}]]),
        );
        assert!(detect_upward_messages(&evt, 100, None, None).is_err());
    }
}
