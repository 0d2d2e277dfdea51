use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A generated proof together with everything needed to verify it.
///
/// `proof` is opaque to the engine; snarkjs-style backends put
/// `{pi_a, pi_b, pi_c, protocol}` here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
  pub proof: Value,
  /// Public signals as decimal strings.
  pub public_signals: Vec<String>,
  pub circuit_id: String,
  pub algorithm: String,
  pub generated_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub security_level: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
  pub bundle: ProofBundle,
  /// Indices into `bundle.public_signals` to reveal. Empty reveals none.
  #[serde(default)]
  pub disclose: Vec<usize>,
  pub recipient: String,
  /// Encryption parameters, passed through to the backend untouched.
  #[serde(default)]
  pub encryption: Value,
}

impl ShareRequest {
  /// The selected public signals, skipping out-of-range indices.
  pub fn disclosed_signals(&self) -> Vec<String> {
    self
      .disclose
      .iter()
      .filter_map(|&i| self.bundle.public_signals.get(i).cloned())
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareReceipt {
  pub share_id: String,
  pub recipient: String,
  pub circuit_id: String,
  pub disclosed_signals: Vec<String>,
  pub shared_at: DateTime<Utc>,
}
