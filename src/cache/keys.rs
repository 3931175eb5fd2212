//! Key derivation helpers.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Result;

/// Stable key for request-derived data: `namespace:<sha256 of the JSON encoding>`.
///
/// Two values with the same JSON encoding map to the same key. Struct field
/// order is part of the encoding, so keep request types stable.
pub fn hashed_key<T: Serialize + ?Sized>(namespace: &str, value: &T) -> Result<String> {
    let encoded = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&encoded);
    let mut key = String::with_capacity(namespace.len() + 1 + digest.len() * 2);
    key.push_str(namespace);
    key.push(':');
    for byte in digest.iter() {
        key.push_str(&format!("{byte:02x}"));
    }
    Ok(key)
}
