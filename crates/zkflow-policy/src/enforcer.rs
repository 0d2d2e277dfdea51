use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::policy::CompliancePolicy;

/// What is being checked: proof metadata plus the proof itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub algorithm: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub generated_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub security_level: Option<u32>,
  #[serde(default)]
  pub proof: Value,
  /// Caller context handed to custom validators.
  #[serde(default)]
  pub context: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
  AllowedAlgorithm,
  MaxProofAge,
  MinSecurityLevel,
  CustomValidator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyViolation {
  pub rule: PolicyRule,
  pub message: String,
}

impl PolicyViolation {
  fn new(rule: PolicyRule, message: impl Into<String>) -> Self {
    Self {
      rule,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyComplianceResult {
  pub compliant: bool,
  pub violations: Vec<PolicyViolation>,
  pub checked_at: DateTime<Utc>,
}

/// A named, caller-supplied proof check.
pub trait ProofValidator: Send + Sync {
  fn validate(&self, proof: &Value, context: &Value) -> bool;
}

/// Adapts a closure into a [`ProofValidator`].
pub struct FnValidator<F>(pub F);

impl<F> ProofValidator for FnValidator<F>
where
  F: Fn(&Value, &Value) -> bool + Send + Sync,
{
  fn validate(&self, proof: &Value, context: &Value) -> bool {
    (self.0)(proof, context)
  }
}

/// Evaluates compliance policies. Holds the registry of custom validators
/// that policies refer to by name.
#[derive(Default)]
pub struct PolicyEnforcer {
  validators: RwLock<HashMap<String, Arc<dyn ProofValidator>>>,
}

impl PolicyEnforcer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or replace) a named validator.
  pub fn register_validator(&self, name: impl Into<String>, validator: Arc<dyn ProofValidator>) {
    let mut validators = self.validators.write().unwrap_or_else(|e| e.into_inner());
    validators.insert(name.into(), validator);
  }

  pub fn has_validator(&self, name: &str) -> bool {
    self
      .validators
      .read()
      .map(|v| v.contains_key(name))
      .unwrap_or(false)
  }

  /// Check every rule of `policy` against `request`.
  pub fn check(&self, policy: &CompliancePolicy, request: &PolicyRequest) -> PolicyComplianceResult {
    let now = Utc::now();
    let mut violations = Vec::new();

    if !policy.allowed_algorithms.is_empty() {
      match &request.algorithm {
        None => violations.push(PolicyViolation::new(
          PolicyRule::AllowedAlgorithm,
          "proof does not declare an algorithm",
        )),
        Some(algorithm) if !policy.allowed_algorithms.iter().any(|a| a == algorithm) => {
          violations.push(PolicyViolation::new(
            PolicyRule::AllowedAlgorithm,
            format!(
              "algorithm {} is not allowed (allowed: {})",
              algorithm,
              policy.allowed_algorithms.join(", ")
            ),
          ))
        }
        Some(_) => {}
      }
    }

    if let Some(max_age) = policy.max_proof_age_secs {
      match request.generated_at {
        None => violations.push(PolicyViolation::new(
          PolicyRule::MaxProofAge,
          "proof has no generation timestamp",
        )),
        Some(generated_at) => {
          let age = (now - generated_at).num_seconds();
          if age > i64::try_from(max_age).unwrap_or(i64::MAX) {
            violations.push(PolicyViolation::new(
              PolicyRule::MaxProofAge,
              format!("proof is {}s old (max {}s)", age, max_age),
            ));
          }
        }
      }
    }

    if let Some(min_level) = policy.min_security_level {
      match request.security_level {
        None => violations.push(PolicyViolation::new(
          PolicyRule::MinSecurityLevel,
          "proof does not declare a security level",
        )),
        Some(level) if level < min_level => violations.push(PolicyViolation::new(
          PolicyRule::MinSecurityLevel,
          format!("security level {} is below minimum {}", level, min_level),
        )),
        Some(_) => {}
      }
    }

    if !policy.custom_validators.is_empty() {
      let validators = self.validators.read().unwrap_or_else(|e| e.into_inner());
      for name in &policy.custom_validators {
        match validators.get(name) {
          None => violations.push(PolicyViolation::new(
            PolicyRule::CustomValidator,
            format!("validator {} is not registered", name),
          )),
          Some(validator) if !validator.validate(&request.proof, &request.context) => violations
            .push(PolicyViolation::new(
              PolicyRule::CustomValidator,
              format!("validator {} rejected the proof", name),
            )),
          Some(_) => {}
        }
      }
    }

    debug!(violations = violations.len(), "policy_checked");

    PolicyComplianceResult {
      compliant: violations.is_empty(),
      violations,
      checked_at: now,
    }
  }
}
