use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zkflow_digest::{Digest, DigestBuilder};

/// Self-declared proof field that never contributes to the fingerprint.
pub const NONCE_FIELD: &str = "nonce";

const DOMAIN: &str = "zkflow/proof-fingerprint/v1";

/// Stable identity of a proof and its public signals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofFingerprint(Digest);

impl ProofFingerprint {
  /// Fingerprint a proof.
  ///
  /// Top-level proof fields named in `excluded`, and the `nonce` field, are
  /// removed before hashing. Everything else is hashed in canonical form.
  pub fn of(proof: &Value, public_signals: &Value, excluded: &[String]) -> Self {
    let proof = match proof {
      Value::Object(map) => Value::Object(
        map
          .iter()
          .filter(|(k, _)| k.as_str() != NONCE_FIELD && !excluded.iter().any(|e| e == *k))
          .map(|(k, v)| (k.clone(), v.clone()))
          .collect(),
      ),
      other => other.clone(),
    };

    Self(
      DigestBuilder::new()
        .text(DOMAIN)
        .value(&proof)
        .value(public_signals)
        .finish(),
    )
  }

  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }
}

impl fmt::Display for ProofFingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}
