//! Shared helper functions for PostgreSQL row conversion.

use pulpo_core::error::{StorageError, StorageResult};

/// Convert a `Vec<u8>` to a fixed-size 32-byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_hash32(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field_name,
            v.len()
        ))
    })
}

/// Parse a NUMERIC column fetched as text into a `u128`.
///
/// Balance and amount columns exceed 64-bit range, so they travel through
/// the wire protocol as decimal strings (`SELECT col::TEXT`).
pub fn numeric_to_u128(text: String, field_name: &str) -> StorageResult<u128> {
    text.parse().map_err(|_| {
        StorageError::SerializationError(format!(
            "{} is not a valid unsigned 128-bit value: {}",
            field_name, text
        ))
    })
}

/// Same as [`numeric_to_u128`] for nullable columns.
pub fn numeric_to_optional_u128(
    text: Option<String>,
    field_name: &str,
) -> StorageResult<Option<u128>> {
    text.map(|t| numeric_to_u128(t, field_name)).transpose()
}
