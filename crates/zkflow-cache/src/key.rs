use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zkflow_digest::{Digest, DigestBuilder};

/// Content address of a cached step output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Digest);

impl CacheKey {
  /// `sha256(circuit_id | operation | canonical(inputs) | policy_digest)`.
  ///
  /// Inputs are canonicalized, so map key order never changes the key.
  pub fn derive(circuit_id: &str, operation: &str, inputs: &Value, policy_digest: &Digest) -> Self {
    Self(
      DigestBuilder::new()
        .text(circuit_id)
        .text(operation)
        .value(inputs)
        .digest(policy_digest)
        .finish(),
    )
  }

  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}
