//! SHA-256 digests over canonical input.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};

use crate::canonical::canonical_bytes;

/// Errors raised while producing a digest.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
  /// The value could not be converted to JSON.
  #[error("failed to serialize value for hashing: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// A hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
  /// Hash raw bytes.
  pub fn of_bytes(bytes: &[u8]) -> Self {
    Self(hex::encode(Sha256::digest(bytes)))
  }

  /// Hash the canonical rendering of a JSON value.
  pub fn of_value(value: &Value) -> Self {
    Self::of_bytes(&canonical_bytes(value))
  }

  /// Hash the canonical rendering of any serializable value.
  pub fn of_serializable<T: Serialize>(value: &T) -> Result<Self, DigestError> {
    Ok(Self::of_bytes(&serde_jcs::to_vec(value)?))
  }

  /// The hex string.
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Wrap an existing hex string (e.g. one loaded from storage).
  pub fn from_hex(hex: impl Into<String>) -> Self {
    Self(hex.into())
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for Digest {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// Incrementally hash a sequence of segments.
///
/// Each segment is length-prefixed, so `("ab", "c")` and `("a", "bc")` never
/// collide.
pub struct DigestBuilder {
  hasher: Sha256,
}

impl DigestBuilder {
  pub fn new() -> Self {
    Self {
      hasher: Sha256::new(),
    }
  }

  /// Append a string segment.
  pub fn text(mut self, segment: &str) -> Self {
    self.push(segment.as_bytes());
    self
  }

  /// Append the canonical rendering of a JSON value.
  pub fn value(mut self, value: &Value) -> Self {
    self.push(&canonical_bytes(value));
    self
  }

  /// Append an existing digest.
  pub fn digest(self, digest: &Digest) -> Self {
    self.text(digest.as_str())
  }

  pub fn finish(self) -> Digest {
    Digest(hex::encode(self.hasher.finalize()))
  }

  fn push(&mut self, bytes: &[u8]) {
    self.hasher.update((bytes.len() as u64).to_be_bytes());
    self.hasher.update(bytes);
  }
}

impl Default for DigestBuilder {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_known_vector() {
    assert_eq!(
      Digest::of_bytes(b"abc").as_str(),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[test]
  fn test_value_digest_ignores_key_order() {
    let a = json!({"x": 1, "y": {"b": 2, "a": 1}});
    let b = json!({"y": {"a": 1, "b": 2}, "x": 1});
    assert_eq!(Digest::of_value(&a), Digest::of_value(&b));
  }

  #[test]
  fn test_builder_segments_are_unambiguous() {
    let first = DigestBuilder::new().text("ab").text("c").finish();
    let second = DigestBuilder::new().text("a").text("bc").finish();
    assert_ne!(first, second);
  }

  #[test]
  fn test_builder_is_deterministic() {
    let build = || {
      DigestBuilder::new()
        .text("age-over-18")
        .value(&json!({"age": 30}))
        .finish()
    };
    assert_eq!(build(), build());
  }

  #[test]
  fn test_serializable_digest_matches_value_digest() {
    #[derive(Serialize)]
    struct Sample {
      b: u32,
      a: &'static str,
    }

    let digest = Digest::of_serializable(&Sample { b: 1, a: "x" }).unwrap();
    assert_eq!(digest, Digest::of_value(&json!({"a": "x", "b": 1})));
  }
}
