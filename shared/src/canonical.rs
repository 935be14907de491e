//! Canonical serialization for cross-process state comparison.
//!
//! Two independent processes that hold equal states must produce the exact
//! same bytes here, or hash comparison is meaningless. `serde_json`'s
//! default `Value` representation keeps object members in a `BTreeMap`, so
//! converting to a `Value` first gives stable key ordering regardless of how
//! a struct declares its fields, and its float formatting is the shortest
//! exact round-trip form, so numeric output is bit-stable as well.

use serde::Serialize;

/// Renders a value in its canonical text form: sorted object keys, exact
/// numeric representation.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

/// Hash of the canonical text form, as a lowercase hex string.
///
/// This is what the server reports for the stable frame and what the client
/// recomputes locally to detect a desync.
pub fn state_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = canonical_json(value)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}
