//! Stable cache keys for test steps.
//!
//! A fingerprint identifies the semantic identity of one step: the
//! instruction text, its normalized parameters, its position in the test,
//! and any context URL override. Two steps with identical fingerprints are
//! eligible for cache replay.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Derive a deterministic, process-independent key for a step.
///
/// Parameters are key-sorted before hashing (the `BTreeMap` guarantees it)
/// so insertion order never changes the key. The canonical tuple is
/// serialized as JSON and hashed with SHA-256.
pub fn fingerprint(
    instruction: &str,
    params: &BTreeMap<String, Value>,
    step_index: usize,
    context_url: Option<&str>,
) -> String {
    let canonical = json!({
        "instruction": instruction.trim(),
        "params": normalize_params(params),
        "step": step_index,
        "url": context_url.unwrap_or_default(),
    });
    let bytes = serde_json::to_vec(&canonical).expect("canonical tuple is always serializable");
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stringify primitive parameter values so that `1` and `"1"` fingerprint
/// identically regardless of how the authoring surface typed them.
fn normalize_params(params: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}
