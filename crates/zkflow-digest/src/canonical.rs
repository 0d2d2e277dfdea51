//! Canonical JSON rendering (RFC 8785, JCS).
//!
//! Object keys are sorted, no insignificant whitespace is written and numbers
//! use their shortest ECMAScript form, so `30` and `30.0` render the same.

use serde_json::Value;

/// Render a JSON value canonically.
pub fn canonical_string(value: &Value) -> String {
  // A `Value` always has string keys and finite numbers, which JCS accepts.
  serde_jcs::to_string(value).unwrap_or_else(|_| value.to_string())
}

/// Canonical rendering as bytes, ready for hashing.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
  canonical_string(value).into_bytes()
}
