//! Canonical JSON encoding.
//!
//! Objects are emitted with sorted keys and compact separators. Struct field
//! order never leaks into a digest because values pass through
//! `serde_json::Value`, whose map type keeps keys ordered.

use serde::Serialize;
use serde_json::Value;

/// Convert any serializable value into its canonical `Value` tree.
pub fn canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value)
}

/// Canonical JSON text.
pub fn canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&canonical_value(value)?)
}

/// Canonical JSON bytes (UTF-8).
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&canonical_value(value)?)
}

/// Round to a fixed number of decimal places so float noise cannot change a digest.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
