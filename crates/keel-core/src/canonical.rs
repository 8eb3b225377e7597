//! Canonical serialization for deterministic hashing and signing.
//!
//! Certificates, trust bundles, and sealed-secrets payloads are hashed and
//! signed over a canonical byte encoding, so every party that serializes the
//! same record must produce the same bytes. The encoding is compact JSON with
//! all object keys sorted lexicographically (byte order) at every nesting
//! level.
//!
//! # Canonicalization Rules
//!
//! 1. Object keys are emitted in ascending byte order
//! 2. No insignificant whitespace
//! 3. Strings use standard JSON escaping
//! 4. Only integral numbers are accepted; floats are rejected
//!
//! # Recursion Limit
//!
//! A maximum nesting depth of 64 levels is enforced so hostile input cannot
//! overflow the stack.

use serde::Serialize;
use thiserror::Error;

/// Maximum nesting depth accepted by the canonicalizer.
const MAX_DEPTH: usize = 64;

/// Errors that can occur while canonicalizing a record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// The value could not be converted into a JSON tree.
    #[error("serialization failed: {reason}")]
    Serialize {
        /// Human-readable reason.
        reason: String,
    },

    /// A non-integral number was encountered.
    ///
    /// Floats are rejected because they have no reliable canonical string
    /// form (`1.0` vs `1.00`), and nothing in the certificate model needs
    /// them.
    #[error("non-integral number cannot be canonicalized")]
    NonIntegralNumber,

    /// The value is nested deeper than the maximum allowed depth.
    #[error("recursion limit exceeded: value nested deeper than {max_depth} levels")]
    RecursionLimitExceeded {
        /// The depth limit that was exceeded.
        max_depth: usize,
    },
}

/// Serializes a value to its canonical byte encoding.
///
/// # Errors
///
/// Returns [`CanonicalError::Serialize`] if the value cannot be represented
/// as JSON, [`CanonicalError::NonIntegralNumber`] if it contains a float, or
/// [`CanonicalError::RecursionLimitExceeded`] if it nests deeper than 64
/// levels.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let tree = serde_json::to_value(value).map_err(|e| CanonicalError::Serialize {
        reason: e.to_string(),
    })?;
    let mut out = Vec::new();
    emit_value(&tree, 0, &mut out)?;
    Ok(out)
}

/// Serializes a value to its canonical encoding as a `String`.
///
/// # Errors
///
/// Same failure modes as [`to_canonical_bytes`].
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let bytes = to_canonical_bytes(value)?;
    // emit_value only ever appends valid JSON text, which is valid UTF-8.
    String::from_utf8(bytes).map_err(|e| CanonicalError::Serialize {
        reason: e.to_string(),
    })
}

fn emit_value(
    value: &serde_json::Value,
    depth: usize,
    out: &mut Vec<u8>,
) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::RecursionLimitExceeded {
            max_depth: MAX_DEPTH,
        });
    }

    match value {
        serde_json::Value::Null => out.extend_from_slice(b"null"),
        serde_json::Value::Bool(b) => {
            out.extend_from_slice(if *b { b"true" } else { b"false" });
        },
        serde_json::Value::Number(n) => {
            if n.is_f64() {
                return Err(CanonicalError::NonIntegralNumber);
            }
            out.extend_from_slice(n.to_string().as_bytes());
        },
        serde_json::Value::String(s) => emit_string(s, out),
        serde_json::Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                emit_value(item, depth + 1, out)?;
            }
            out.push(b']');
        },
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                emit_string(key, out);
                out.push(b':');
                // Key presence is guaranteed: `keys` was collected from `map`.
                if let Some(v) = map.get(key.as_str()) {
                    emit_value(v, depth + 1, out)?;
                }
            }
            out.push(b'}');
        },
    }
    Ok(())
}

/// Emits a JSON string literal with standard escaping.
fn emit_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                let escaped = format!("\\u{:04x}", c as u32);
                out.extend_from_slice(escaped.as_bytes());
            },
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            },
        }
    }
    out.push(b'"');
}
