use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deterministic workflow identifier: `<family>:<entity_id>[:<attempt>]`.
///
/// Side-effecting workflows derive their id from the operation and the
/// target entity so a re-submitted trigger lands on the existing run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn derive(family: &str, entity_id: &str) -> Self {
        Self(format!("{family}:{entity_id}"))
    }

    pub fn derive_attempt(family: &str, entity_id: &str, attempt: u32) -> Self {
        Self(format!("{family}:{entity_id}:{attempt}"))
    }

    /// Id for event-triggered sync workflows: the discriminator is a
    /// SHA-256 fingerprint of the event payload, so replays of the same
    /// event deduplicate onto one run.
    pub fn derive_fingerprint(family: &str, entity_id: &str, event: &serde_json::Value) -> Self {
        Self(format!(
            "{family}:{entity_id}:{}",
            event_fingerprint(event)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the engine treats a start request whose id matches a prior run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdReusePolicy {
    /// A new run may start once the previous one closed.
    AllowDuplicate,
    /// The existing run handle is returned instead of starting a second.
    RejectDuplicate,
}

/// SHA-256 fingerprint of a JSON payload over its canonical bytes
/// (object keys sorted recursively), truncated to 16 hex chars.
pub fn event_fingerprint(event: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(event));
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn canonical_bytes(value: &serde_json::Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut Vec<u8>) {
    match value {
        serde_json::Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(format!("{:?}:", key).as_bytes());
                write_canonical(&map[*key], out);
            }
            out.push(b'}');
        }
        serde_json::Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        other => out.extend_from_slice(other.to_string().as_bytes()),
    }
}
