use std::time::Duration;

use serde::{Deserialize, Serialize};
use zkflow_config::{RetryBackoff, RetryPolicy};
use zkflow_policy::CompliancePolicy;

/// Tuning for a [`crate::WorkflowOrchestrator`]. Every field has a default,
/// so `{}` is a valid configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
  /// Upper bound on concurrently executing steps, across all runs.
  pub max_concurrency: usize,
  /// Per-attempt timeout for steps that do not set one.
  pub default_timeout_ms: u64,
  /// Retry policy applied under `retry_on_error` to steps without retries.
  pub default_retry: RetryPolicy,
  /// TTL for cached proofs and verification outcomes.
  pub cache_ttl_ms: u64,
  pub cache_max_entries: usize,
  pub cache_sweep_interval_ms: u64,
  /// Forget replay fingerprints not seen for this long. Kept forever when
  /// unset.
  pub replay_retention_ms: Option<u64>,
  /// Policy used by verify steps that do not carry their own.
  pub default_policy: CompliancePolicy,
  /// Proof system requested from the prover when a step does not name one.
  pub default_algorithm: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_concurrency: 8,
      default_timeout_ms: 5 * 60 * 1000,
      default_retry: RetryPolicy::new(3, 500).with_backoff(RetryBackoff::Exponential),
      cache_ttl_ms: 60 * 60 * 1000,
      cache_max_entries: 10_000,
      cache_sweep_interval_ms: 60 * 1000,
      replay_retention_ms: None,
      default_policy: CompliancePolicy::default(),
      default_algorithm: "groth16".to_string(),
    }
  }
}

impl EngineConfig {
  pub fn default_timeout(&self) -> Duration {
    Duration::from_millis(self.default_timeout_ms)
  }

  pub fn cache_ttl(&self) -> Duration {
    Duration::from_millis(self.cache_ttl_ms)
  }

  pub fn cache_sweep_interval(&self) -> Duration {
    Duration::from_millis(self.cache_sweep_interval_ms.max(1))
  }

  pub fn replay_retention(&self) -> Option<Duration> {
    self.replay_retention_ms.map(Duration::from_millis)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_object_uses_defaults() {
    let config: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.max_concurrency, 8);
    assert_eq!(config.default_timeout(), Duration::from_secs(300));
    assert_eq!(config.default_retry.max_retries, 3);
  }

  #[test]
  fn test_partial_override() {
    let config: EngineConfig = serde_json::from_str(
      r#"{ "maxConcurrency": 2, "defaultPolicy": { "rejectReplays": true } }"#,
    )
    .unwrap();
    assert_eq!(config.max_concurrency, 2);
    assert!(config.default_policy.reject_replays);
    assert_eq!(config.cache_max_entries, 10_000);
  }
}
