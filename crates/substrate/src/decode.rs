//! SCALE value decoding helpers.
//!
//! Everything here is pure: SCALE `Value` trees in, JSON (or domain shapes)
//! out. Numeric primitives wider than 53 bits become decimal strings so the
//! JSON survives every downstream consumer unchanged.

use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};

use pulpo_core::ports::RawCall;

// =============================================================================
// SCALE Value to JSON conversion
// =============================================================================

/// Convert a Composite to a JSON value.
pub fn composite_to_json<T>(composite: &Composite<T>) -> serde_json::Value {
    match composite {
        Composite::Unnamed(values) => {
            // Check if this looks like a byte array (e.g., AccountId, Hash)
            if let Some(hex_str) = try_as_byte_array(values) {
                return serde_json::Value::String(hex_str);
            }
            // Unwrap single-element tuples (common for newtype wrappers like AccountId)
            if values.len() == 1 {
                return value_to_json(&values[0]);
            }
            serde_json::Value::Array(values.iter().map(value_to_json).collect())
        }
        Composite::Named(fields) => {
            let obj: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(name, v)| (name.clone(), value_to_json(v)))
                .collect();
            serde_json::Value::Object(obj)
        }
    }
}

/// Try to interpret an unnamed composite as a byte array (AccountId, Hash, etc).
/// Returns a hex string if the composite looks like a byte array, None otherwise.
fn try_as_byte_array<T>(values: &[Value<T>]) -> Option<String> {
    // Common byte array sizes: 32 (AccountId, Hash), 20 (EthAddress), etc.
    let len = values.len();
    if len != 32 && len != 20 && len != 64 {
        return None;
    }

    let mut bytes = Vec::with_capacity(len);
    for value in values {
        if let ValueDef::Primitive(Primitive::U128(n)) = &value.value {
            if *n <= 255 {
                bytes.push(*n as u8);
            } else {
                return None;
            }
        } else {
            return None;
        }
    }

    Some(format!("0x{}", hex::encode(bytes)))
}

/// Convert a Value to a JSON value.
pub fn value_to_json<T>(value: &Value<T>) -> serde_json::Value {
    value_def_to_json(&value.value)
}

/// Convert a ValueDef to a JSON value.
fn value_def_to_json<T>(value: &ValueDef<T>) -> serde_json::Value {
    match value {
        ValueDef::Composite(composite) => composite_to_json(composite),
        ValueDef::Variant(variant) => {
            let variant_name = &variant.name;
            let inner = composite_to_json(&variant.values);

            // For Option variants, simplify
            if variant_name == "Some" {
                // Extract the single value from Some
                if let serde_json::Value::Array(arr) = &inner
                    && arr.len() == 1
                {
                    return arr[0].clone();
                }
                return inner;
            } else if variant_name == "None" {
                return serde_json::Value::Null;
            }

            // For Id variant (common in AccountId), unwrap it
            if variant_name == "Id" {
                if let serde_json::Value::Array(arr) = &inner
                    && arr.len() == 1
                {
                    return arr[0].clone();
                }
                return inner;
            }

            // For other variants, wrap in object
            let mut map = serde_json::Map::new();
            map.insert(variant_name.clone(), inner);
            serde_json::Value::Object(map)
        }
        ValueDef::Primitive(primitive) => primitive_to_json(primitive),
        ValueDef::BitSequence(bits) => serde_json::Value::String(format!("{:?}", bits)),
    }
}

/// Convert a Primitive to a JSON value.
fn primitive_to_json(primitive: &Primitive) -> serde_json::Value {
    match primitive {
        Primitive::Bool(b) => serde_json::Value::Bool(*b),
        Primitive::Char(c) => serde_json::Value::String(c.to_string()),
        Primitive::String(s) => serde_json::Value::String(s.clone()),
        Primitive::U128(n) => serde_json::Value::String(n.to_string()),
        Primitive::I128(n) => serde_json::Value::String(n.to_string()),
        Primitive::U256(n) => serde_json::Value::String(format!("{:?}", n)),
        Primitive::I256(n) => serde_json::Value::String(format!("{:?}", n)),
    }
}

// =============================================================================
// Nested call extraction
// =============================================================================

/// Extract nested sub-calls from a wrapper extrinsic's decoded arguments.
///
/// `Utility.batch`/`batch_all`/`force_batch` carry a `calls` array and
/// `Proxy.proxy` a single `call`; anything else has no call tree. The JSON
/// encoding of a runtime call is two nested single-key variant objects:
/// `{"Pallet": {"call_name": {args...}}}`.
pub fn extract_sub_calls(pallet: &str, call: &str, args: &serde_json::Value) -> Vec<RawCall> {
    match (pallet, call) {
        ("Utility", "batch") | ("Utility", "batch_all") | ("Utility", "force_batch") => args
            .get("calls")
            .and_then(|c| c.as_array())
            .map(|calls| calls.iter().filter_map(parse_call_value).collect())
            .unwrap_or_default(),
        ("Proxy", "proxy") | ("Proxy", "proxy_announced") => args
            .get("call")
            .and_then(parse_call_value_opt)
            .map(|c| vec![c])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn parse_call_value_opt(value: &serde_json::Value) -> Option<RawCall> {
    parse_call_value(value)
}

/// Parse one runtime-call JSON value into a [`RawCall`], recursing into its
/// own nested calls.
fn parse_call_value(value: &serde_json::Value) -> Option<RawCall> {
    let outer = value.as_object()?;
    if outer.len() != 1 {
        return None;
    }
    let (pallet, inner) = outer.iter().next()?;

    let inner_obj = inner.as_object()?;
    if inner_obj.len() != 1 {
        return None;
    }
    let (call, args) = inner_obj.iter().next()?;

    Some(RawCall {
        pallet: pallet.clone(),
        call: call.clone(),
        args: args.clone(),
        sub_calls: extract_sub_calls(pallet, call, args),
    })
}

// =============================================================================
// Compact timestamp decoding
// =============================================================================

/// Try to decode a Compact<u64> from bytes.
pub fn try_decode_compact_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    let first = bytes[0];
    let mode = first & 0b11;

    match mode {
        0b00 => Some((first >> 2) as u64),
        0b01 => {
            if bytes.len() < 2 {
                return None;
            }
            let value = u16::from_le_bytes([bytes[0], bytes[1]]) >> 2;
            Some(value as u64)
        }
        0b10 => {
            if bytes.len() < 4 {
                return None;
            }
            let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) >> 2;
            Some(value as u64)
        }
        0b11 => {
            let num_bytes = ((first >> 2) + 4) as usize;
            if bytes.len() < 1 + num_bytes || num_bytes > 8 {
                return None;
            }
            let mut value_bytes = [0u8; 8];
            value_bytes[..num_bytes].copy_from_slice(&bytes[1..1 + num_bytes]);
            Some(u64::from_le_bytes(value_bytes))
        }
        _ => None,
    }
}

/// Parse a plausible millisecond timestamp out of a decoded value's debug
/// rendering. Bounded to 2020..2050 to avoid picking up stray numbers.
pub fn parse_timestamp_from_debug(s: &str) -> Option<u64> {
    const MIN_TIMESTAMP_MS: u64 = 1_577_836_800_000;
    const MAX_TIMESTAMP_MS: u64 = 2_524_608_000_000;

    for part in s.split(|c: char| !c.is_ascii_digit()) {
        if let Ok(num) = part.parse::<u64>()
            && (MIN_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(&num)
        {
            return Some(num);
        }
    }
    None
}
