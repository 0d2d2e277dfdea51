use serde::{Deserialize, Serialize};
use serde_json::json;
use zkflow_digest::Digest;

/// What a non-compliant verification does to its step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
  /// Violations fail the step.
  #[default]
  Fail,
  /// Violations are reported in the step output only.
  Warn,
}

/// Declarative compliance rules for proofs.
///
/// Every rule is optional; the default policy accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompliancePolicy {
  /// Accepted proof systems (`groth16`, `plonk`, ...). Empty accepts any.
  #[serde(default)]
  pub allowed_algorithms: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_proof_age_secs: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_security_level: Option<u32>,
  /// Names of validators registered with the enforcer.
  #[serde(default)]
  pub custom_validators: Vec<String>,
  #[serde(default)]
  pub enforcement: Enforcement,
  /// Fail verification when the proof has been seen before.
  #[serde(default)]
  pub reject_replays: bool,
  /// Extra top-level proof fields left out of replay fingerprints.
  #[serde(default)]
  pub fingerprint_exclusions: Vec<String>,
}

impl CompliancePolicy {
  pub fn allow_algorithms<I, S>(mut self, algorithms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.allowed_algorithms = algorithms.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_max_proof_age_secs(mut self, secs: u64) -> Self {
    self.max_proof_age_secs = Some(secs);
    self
  }

  pub fn with_min_security_level(mut self, level: u32) -> Self {
    self.min_security_level = Some(level);
    self
  }

  pub fn with_validator(mut self, name: impl Into<String>) -> Self {
    self.custom_validators.push(name.into());
    self
  }

  pub fn with_enforcement(mut self, enforcement: Enforcement) -> Self {
    self.enforcement = enforcement;
    self
  }

  pub fn rejecting_replays(mut self) -> Self {
    self.reject_replays = true;
    self
  }

  /// Content hash of the policy, used as part of cache keys.
  ///
  /// Lists are hashed as sets, so reordering them keeps the digest stable.
  pub fn digest(&self) -> Digest {
    let sorted = |items: &[String]| {
      let mut items = items.to_vec();
      items.sort();
      items.dedup();
      items
    };

    Digest::of_value(&json!({
      "allowedAlgorithms": sorted(&self.allowed_algorithms),
      "maxProofAgeSecs": self.max_proof_age_secs,
      "minSecurityLevel": self.min_security_level,
      "customValidators": sorted(&self.custom_validators),
      "enforcement": self.enforcement,
      "rejectReplays": self.reject_replays,
      "fingerprintExclusions": sorted(&self.fingerprint_exclusions),
    }))
  }
}
