//! Bencode codec boundary.
//!
//! The wire grammar (byte strings, integers, lists, dictionaries) is handled
//! entirely by `serde_bencode`. This module only pins the value model used by
//! the rest of the crate and converts codec output into `Bytes`.
//!
//! Dictionaries are encoded with their keys sorted by raw bytes, which is the
//! canonical form peers expect.

use std::collections::HashMap;

use bytes::Bytes;

use crate::Result;

pub use serde_bencode::value::Value;

/// A bencode dictionary keyed by raw byte strings.
pub type Dict = HashMap<Vec<u8>, Value>;

/// Encode a value into its canonical bencoded form.
pub fn encode(value: &Value) -> Result<Bytes> {
    // ---
    let raw = serde_bencode::to_bytes(value)?;
    Ok(Bytes::from(raw))
}

/// Decode a bencoded buffer.
///
/// # Errors
///
/// Returns [`RpcError::Codec`](crate::RpcError::Codec) when the buffer is not
/// valid bencode.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    // ---
    let value = serde_bencode::from_bytes(bytes)?;
    Ok(value)
}

/// Wrap raw bytes as a bencode byte string.
pub fn byte_string(bytes: impl AsRef<[u8]>) -> Value {
    Value::Bytes(bytes.as_ref().to_vec())
}

/// Build a dictionary from `(key, value)` pairs.
pub fn dict<K, I>(entries: I) -> Dict
where
    K: AsRef<[u8]>,
    I: IntoIterator<Item = (K, Value)>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.as_ref().to_vec(), value))
        .collect()
}
