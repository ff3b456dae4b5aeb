//! Canonical byte encoding and content hashing.
//!
//! Encoding: JSON with object keys sorted bytewise, no insignificant
//! whitespace, UTF-8 strings with standard JSON escapes, integers in decimal.
//! Floats never enter hashed structures.
//!
//! Hash: `hex(SHA-256(domain_tag || 0x00 || canonical_bytes))`.

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Domain separation tags, one per hashed object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashDomain {
    Snapshot,
    StateAfter,
    Command,
    Idempotency,
    Determinism,
    Record,
    Canon,
    Intent,
}

impl HashDomain {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Snapshot => "AXGATE:HASH:SNAPSHOT",
            Self::StateAfter => "AXGATE:HASH:STATE_AFTER",
            Self::Command => "AXGATE:HASH:COMMAND",
            Self::Idempotency => "AXGATE:HASH:IDEMPOTENCY",
            Self::Determinism => "AXGATE:HASH:DETERMINISM",
            Self::Record => "AXGATE:HASH:RECORD",
            Self::Canon => "AXGATE:HASH:CANON",
            Self::Intent => "AXGATE:HASH:INTENT",
        }
    }
}

/// Canonical bytes of an arbitrary JSON value.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push(b'}');
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // Serializing a &str into a Vec cannot fail.
    if serde_json::to_writer(&mut *out, s).is_err() {
        out.extend_from_slice(b"\"\"");
    }
}

/// Domain-separated SHA-256 over the canonical bytes of `value`, hex encoded.
pub fn hash_value(domain: HashDomain, value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.tag().as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_bytes(value));
    hex::encode(hasher.finalize())
}

/// Convert a serializable value to JSON and hash it.
pub fn hash_serialize<T: Serialize + ?Sized>(
    domain: HashDomain,
    value: &T,
) -> anyhow::Result<String> {
    let value = serde_json::to_value(value).context("encode value for canonical hashing")?;
    Ok(hash_value(domain, &value))
}

/// First `n` hex characters of a hash, for short human-facing identifiers.
pub fn short(hash: &str, n: usize) -> &str {
    hash.get(..n).unwrap_or(hash)
}
