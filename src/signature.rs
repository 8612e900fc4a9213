//! Tool-call signatures
//!
//! A signature is a deterministic fingerprint of `(namespace?, tool, args)`
//! used as the tool-cache key. Args are serialized with recursive key
//! sorting so JSON-equivalent objects hash identically regardless of key
//! order.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Serialize a JSON value canonically: compact, object keys sorted
/// recursively, array order preserved.
pub fn stable_json(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key serialization via serde_json to get proper escaping
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Compute `<tool>:<sha256-hex>` over `namespace? || tool || stable_json(args)`.
pub fn signature(namespace: Option<&str>, tool: &str, args: &Value) -> String {
    let mut payload = String::new();
    if let Some(ns) = namespace {
        payload.push_str(ns);
        payload.push_str("::");
    }
    payload.push_str(tool);
    payload.push_str(&stable_json(args));

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(64);
    for byte in digest {
        write!(hex, "{:02x}", byte).expect("writing to String cannot fail");
    }

    format!("{}:{}", tool, hex)
}

/// Sha256 hex of an arbitrary string (dedupe keys).
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(64);
    for byte in digest {
        write!(hex, "{:02x}", byte).expect("writing to String cannot fail");
    }
    hex
}
