use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};
use zkflow_backend::{ProofBundle, VerificationBackend};
use zkflow_cache::CacheKey;
use zkflow_config::StepDef;
use zkflow_policy::{CompliancePolicy, Enforcement, PolicyRequest};
use zkflow_replay::{AntiReplayResult, ProofFingerprint, ReplayContext};

use super::{StepServices, flag, parameter, required};
use crate::context::WorkflowContext;
use crate::error::StepError;
use crate::executor::{StepExecutor, StepOutput};

/// Checks a proof bundle against policy, replay history and the verifier.
///
/// Policy and replay checks run before the backend is consulted. The
/// backend's answer is cached per circuit, proof, signals, verification key
/// and policy.
pub struct VerifyStep {
  verifier: Arc<dyn VerificationBackend>,
  services: StepServices,
}

impl VerifyStep {
  pub(crate) fn new(verifier: Arc<dyn VerificationBackend>, services: StepServices) -> Self {
    Self { verifier, services }
  }

  /// Replay check for this step. A retried attempt reuses the first
  /// attempt's observation of the same proof.
  fn replay_check(
    &self,
    step: &StepDef,
    ctx: &WorkflowContext,
    fingerprint: &ProofFingerprint,
  ) -> AntiReplayResult {
    if let Some(previous) = ctx
      .replay_check(&step.step_id)
      .filter(|p| &p.fingerprint == fingerprint)
    {
      return previous;
    }

    let check = self.services.replay.check(
      fingerprint,
      ReplayContext::new(ctx.workflow_id(), step.step_id.as_str()),
    );
    ctx.set_replay_check(&step.step_id, check.clone());
    check
  }

  async fn verify_cached(
    &self,
    step: &StepDef,
    ctx: &WorkflowContext,
    bundle: &ProofBundle,
    verification_key: &Value,
    policy: &CompliancePolicy,
  ) -> Result<(bool, Option<bool>), StepError> {
    if !flag(step, "cache", true) {
      let valid = self.verifier.verify(bundle, verification_key).await?;
      return Ok((valid, None));
    }

    let key = CacheKey::derive(
      &bundle.circuit_id,
      "verify",
      &json!({
        "proof": bundle.proof,
        "publicSignals": bundle.public_signals,
        "verificationKey": verification_key,
      }),
      &policy.digest(),
    );

    match self.services.cache.get(&key) {
      Ok(Some(Value::Bool(valid))) => {
        debug!(step_id = %step.step_id, cache_key = %key, "verification_cache_hit");
        return Ok((valid, Some(true)));
      }
      Ok(_) => {}
      Err(e) => warn!(cache_key = %key, error = %e, "cache_read_failed"),
    }

    let valid = self.verifier.verify(bundle, verification_key).await?;
    let ttl = self.services.cache_ttl(step, ctx)?;
    if let Err(e) = self.services.cache.put(key.clone(), Value::Bool(valid), ttl) {
      warn!(cache_key = %key, error = %e, "cache_write_failed");
    }
    Ok((valid, Some(false)))
  }
}

#[async_trait]
impl StepExecutor for VerifyStep {
  async fn execute(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<StepOutput, StepError> {
    let bundle: ProofBundle = required(step, ctx, "proofBundle")?;
    let verification_key: Value = parameter(step, ctx, "verificationKey")?.unwrap_or(Value::Null);
    let policy = self.services.policy(step, ctx)?;

    let context = parameter(step, ctx, "context")?.unwrap_or_else(|| {
      json!({
        "workflowId": ctx.workflow_id(),
        "stepId": step.step_id,
        "circuitId": bundle.circuit_id,
      })
    });
    let compliance = self.services.enforcer.check(
      &policy,
      &PolicyRequest {
        algorithm: Some(bundle.algorithm.clone()),
        generated_at: Some(bundle.generated_at),
        security_level: bundle.security_level,
        proof: bundle.proof.clone(),
        context,
      },
    );
    if !compliance.compliant {
      match policy.enforcement {
        Enforcement::Fail => {
          return Err(StepError::PolicyViolation {
            violations: compliance.violations,
          });
        }
        Enforcement::Warn => warn!(
          step_id = %step.step_id,
          violations = compliance.violations.len(),
          "policy_violations_ignored"
        ),
      }
    }

    let fingerprint = ProofFingerprint::of(
      &bundle.proof,
      &json!(bundle.public_signals),
      &policy.fingerprint_exclusions,
    );
    let anti_replay = self.replay_check(step, ctx, &fingerprint);
    if anti_replay.is_replay && policy.reject_replays {
      return Err(StepError::ReplayDetected {
        fingerprint: fingerprint.to_string(),
      });
    }

    let (valid, cache_hit) = self
      .verify_cached(step, ctx, &bundle, &verification_key, &policy)
      .await?;
    if !valid && flag(step, "failOnInvalid", true) {
      return Err(StepError::InvalidProof(format!(
        "verifier rejected proof for circuit '{}'",
        bundle.circuit_id
      )));
    }

    let output = json!({
      "valid": valid,
      "circuitId": bundle.circuit_id,
      "fingerprint": fingerprint,
      "policy": compliance,
      "antiReplay": anti_replay,
    });
    ctx.set_shared("verification", output.clone());

    Ok(StepOutput {
      data: output,
      cache_hit,
    })
  }
}
