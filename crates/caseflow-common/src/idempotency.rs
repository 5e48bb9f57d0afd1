//! Idempotency keys for batches, rows, and jobs
//!
//! Every duplicate-detection guarantee in the pipeline rests on these
//! functions returning bit-identical output for the same logical input,
//! across process restarts and hosts. They are total and side-effect free:
//! no hash-seed randomization, no locale dependence, no reliance on map
//! iteration order.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute the content hash of a raw upload.
///
/// Used as the batch identity: importing byte-identical files resolves to
/// the same batch, never a new one.
pub fn file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compute the dedupe key for a row from its canonical fields.
///
/// Fields are normalized (trimmed, case-folded, inner whitespace collapsed)
/// and sorted by name before hashing, so the key is insensitive to column
/// order and to whitespace/case noise introduced upstream.
pub fn row_dedupe_key(fields: &[(&str, &str)]) -> String {
    let mut normalized: Vec<(String, String)> = fields
        .iter()
        .map(|(name, value)| (normalize_field(name), normalize_field(value)))
        .collect();
    normalized.sort();

    let mut hasher = Sha256::new();
    for (name, value) in &normalized {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Compute the dedupe key for a unit of work.
///
/// `semantic` must contain only the payload fields that define "the same
/// job" — callers exclude timestamps and retry counters before calling.
pub fn job_dedup_key(job_type: &str, semantic: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(semantic).as_bytes());
    hex::encode(hasher.finalize())
}

/// Render a JSON value with recursively sorted object keys, compactly.
///
/// Guards the job key against map-ordering differences between producers.
pub fn canonical_json(value: &Value) -> String {
    let sorted = sort_keys(value);
    // Serializing a tree of `Value`s cannot fail: keys are strings and
    // `serde_json::Number` rejects non-finite floats at construction.
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, val) in entries {
                sorted.insert(key.clone(), sort_keys(val));
            }
            Value::Object(sorted)
        },
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Normalize a field name or value: trim, case-fold, collapse runs of
/// whitespace to a single space.
pub fn normalize_field(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
