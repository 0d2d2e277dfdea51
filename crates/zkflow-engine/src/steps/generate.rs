use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};
use zkflow_backend::{ProofBundle, ProvingBackend};
use zkflow_cache::CacheKey;
use zkflow_config::StepDef;

use super::{StepServices, flag, lookup, parameter, required};
use crate::context::WorkflowContext;
use crate::error::StepError;
use crate::executor::{StepExecutor, StepOutput};

/// Produces a proof, reusing a cached bundle for identical inputs.
///
/// The cache key covers the circuit, the algorithm, the canonical inputs and
/// the policy digest. Set `"cache": false` in the configuration to always
/// prove.
pub struct GenerateStep {
  prover: Arc<dyn ProvingBackend>,
  services: StepServices,
}

impl GenerateStep {
  pub(crate) fn new(prover: Arc<dyn ProvingBackend>, services: StepServices) -> Self {
    Self { prover, services }
  }

  fn cached_bundle(&self, key: &CacheKey) -> Option<ProofBundle> {
    match self.services.cache.get(key) {
      Ok(Some(value)) => match serde_json::from_value(value) {
        Ok(bundle) => Some(bundle),
        Err(e) => {
          warn!(cache_key = %key, error = %e, "cached_bundle_unreadable");
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!(cache_key = %key, error = %e, "cache_read_failed");
        None
      }
    }
  }
}

#[async_trait]
impl StepExecutor for GenerateStep {
  async fn execute(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<StepOutput, StepError> {
    let circuit_id: String = required(step, ctx, "circuitId")?;
    let inputs = step
      .config("inputs")
      .filter(|v| !v.is_null())
      .cloned()
      .or_else(|| lookup(step, ctx, "zkInputs"))
      .ok_or_else(|| StepError::MissingInput("zkInputs".into()))?;
    let algorithm: String =
      parameter(step, ctx, "algorithm")?.unwrap_or_else(|| self.services.default_algorithm.clone());
    let policy = self.services.policy(step, ctx)?;
    let use_cache = flag(step, "cache", true);

    let key = CacheKey::derive(
      &circuit_id,
      &format!("generate:{}", algorithm),
      &inputs,
      &policy.digest(),
    );

    let cached = if use_cache {
      self.cached_bundle(&key)
    } else {
      None
    };
    let cache_hit = cached.is_some();

    let bundle = match cached {
      Some(bundle) => {
        debug!(step_id = %step.step_id, cache_key = %key, "proof_cache_hit");
        bundle
      }
      None => {
        let bundle = self.prover.prove(&circuit_id, &inputs, &algorithm).await?;
        if use_cache {
          let ttl = self.services.cache_ttl(step, ctx)?;
          let value = serde_json::to_value(&bundle)
            .map_err(|e| StepError::execution(format!("failed to encode proof bundle: {}", e)))?;
          if let Err(e) = self.services.cache.put(key.clone(), value, ttl) {
            warn!(cache_key = %key, error = %e, "cache_write_failed");
          }
        }
        bundle
      }
    };

    let bundle_value = serde_json::to_value(&bundle)
      .map_err(|e| StepError::execution(format!("failed to encode proof bundle: {}", e)))?;
    ctx.set_shared("proof", bundle.proof.clone());
    ctx.set_shared("publicSignals", json!(bundle.public_signals));
    ctx.set_shared("proofBundle", bundle_value.clone());

    let mut output = bundle_value;
    if let Value::Object(map) = &mut output {
      map.insert("cacheKey".into(), Value::String(key.to_string()));
    }

    if use_cache {
      Ok(StepOutput::cached(output, cache_hit))
    } else {
      Ok(StepOutput::new(output))
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::config::EngineConfig;
  use zkflow_backend::mock::MockProver;
  use zkflow_cache::CacheStore;
  use zkflow_config::{StepType, WorkflowInput};
  use zkflow_policy::PolicyEnforcer;
  use zkflow_replay::ReplayDetector;

  fn services() -> StepServices {
    StepServices::new(
      &EngineConfig::default(),
      Arc::new(CacheStore::new(16, Duration::from_secs(60))),
      Arc::new(ReplayDetector::new()),
      Arc::new(PolicyEnforcer::new()),
    )
  }

  fn context() -> WorkflowContext {
    let mut input = WorkflowInput::new();
    input.insert(
      "generate".into(),
      json!({"circuitId": "age-over-18", "zkInputs": {"age": "30"}}),
    );
    WorkflowContext::new("wf", input)
  }

  #[tokio::test]
  async fn test_second_generate_hits_cache() {
    let prover = Arc::new(MockProver::new());
    let step = GenerateStep::new(prover.clone(), services());
    let def = StepDef::new("generate", StepType::Generate);

    let first = step.execute(&def, &context()).await.unwrap();
    let second = step.execute(&def, &context()).await.unwrap();

    assert_eq!(first.cache_hit, Some(false));
    assert_eq!(second.cache_hit, Some(true));
    assert_eq!(first.data["proof"], second.data["proof"]);
    assert_eq!(first.data["cacheKey"], second.data["cacheKey"]);
    assert_eq!(prover.calls(), 1);
  }

  #[tokio::test]
  async fn test_cache_can_be_disabled() {
    let prover = Arc::new(MockProver::new());
    let step = GenerateStep::new(prover.clone(), services());
    let def =
      StepDef::new("generate", StepType::Generate).with_configuration(json!({"cache": false}));

    let output = step.execute(&def, &context()).await.unwrap();
    step.execute(&def, &context()).await.unwrap();

    assert_eq!(output.cache_hit, None);
    assert_eq!(prover.calls(), 2);
  }

  #[tokio::test]
  async fn test_publishes_proof_to_shared_data() {
    let step = GenerateStep::new(Arc::new(MockProver::new()), services());
    let ctx = context();
    step
      .execute(&StepDef::new("generate", StepType::Generate), &ctx)
      .await
      .unwrap();

    assert!(ctx.shared("proof").unwrap()["pi_a"].is_array());
    assert_eq!(ctx.shared("publicSignals").unwrap()[0], "1");
    let bundle: ProofBundle = serde_json::from_value(ctx.shared("proofBundle").unwrap()).unwrap();
    assert_eq!(bundle.circuit_id, "age-over-18");
    assert_eq!(bundle.algorithm, "groth16");
  }
}
