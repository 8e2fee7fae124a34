// SPDX-License-Identifier: MIT

//! Hashing helpers for the event hash chain and idempotency-key derivation.

use sha2::{Digest, Sha256};

/// Hash a sequence of `|`-joined string parts, returning a lowercase hex digest.
pub fn hash_parts(parts: &[&str]) -> String {
    hash_bytes(parts.join("|").as_bytes())
}

/// Hash raw bytes, returning a lowercase hex digest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Canonical JSON serialization: keys sorted recursively so the same logical
/// value always hashes to the same bytes regardless of field insertion order.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), sorted(v));
                }
                serde_json::Value::Object(out)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Compute an idempotency key: `H(job_id | step_id | tool_name | canonical-JSON(args))`.
pub fn idempotency_key(job_id: &str, step_id: &str, tool_name: &str, args: &serde_json::Value) -> String {
    hash_parts(&[job_id, step_id, tool_name, &canonical_json(args)])
}

/// Compute the hash chain link for one event:
/// `hash = H(job_id | type | payload | created_at | prev_hash)`.
pub fn event_hash(job_id: &str, event_type: &str, payload: &serde_json::Value, created_at_rfc3339: &str, prev_hash: &str) -> String {
    hash_parts(&[job_id, event_type, &canonical_json(payload), created_at_rfc3339, prev_hash])
}
