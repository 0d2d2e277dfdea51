//! Built-in step executors.
//!
//! Each built-in resolves its parameters from, in order: the step's
//! `configuration`, the workflow input under the step's type, and the run's
//! shared data. Cryptographic work is always delegated to a backend.

mod generate;
mod share;
mod transform;
mod verify;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use zkflow_backend::{CredentialTransformer, ProvingBackend, ShareBackend, VerificationBackend};
use zkflow_cache::CacheBackend;
use zkflow_config::{StepDef, StepType};
use zkflow_policy::{CompliancePolicy, PolicyEnforcer};
use zkflow_replay::ReplayDetector;

use crate::config::EngineConfig;
use crate::context::WorkflowContext;
use crate::error::StepError;
use crate::executor::ExecutorRegistry;

pub use generate::GenerateStep;
pub use share::ShareStep;
pub use transform::TransformStep;
pub use verify::VerifyStep;

/// The external services the built-in steps delegate to.
#[derive(Clone)]
pub struct Backends {
  pub transformer: Arc<dyn CredentialTransformer>,
  pub prover: Arc<dyn ProvingBackend>,
  pub verifier: Arc<dyn VerificationBackend>,
  pub sharer: Arc<dyn ShareBackend>,
}

#[cfg(feature = "mock")]
impl Backends {
  /// Deterministic in-process backends.
  pub fn mock() -> Self {
    use zkflow_backend::mock::{MockProver, MockSharer, MockTransformer, MockVerifier};

    Self {
      transformer: Arc::new(MockTransformer),
      prover: Arc::new(MockProver::new()),
      verifier: Arc::new(MockVerifier::new()),
      sharer: Arc::new(MockSharer::new()),
    }
  }
}

/// Shared engine services handed to the built-ins.
#[derive(Clone)]
pub(crate) struct StepServices {
  pub cache: Arc<dyn CacheBackend>,
  pub replay: Arc<ReplayDetector>,
  pub enforcer: Arc<PolicyEnforcer>,
  pub default_policy: CompliancePolicy,
  pub default_algorithm: String,
  pub cache_ttl: Duration,
}

impl StepServices {
  pub fn new(
    config: &EngineConfig,
    cache: Arc<dyn CacheBackend>,
    replay: Arc<ReplayDetector>,
    enforcer: Arc<PolicyEnforcer>,
  ) -> Self {
    Self {
      cache,
      replay,
      enforcer,
      default_policy: config.default_policy.clone(),
      default_algorithm: config.default_algorithm.clone(),
      cache_ttl: config.cache_ttl(),
    }
  }

  /// The step's `policy` parameter, or the engine default.
  fn policy(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<CompliancePolicy, StepError> {
    Ok(parameter(step, ctx, "policy")?.unwrap_or_else(|| self.default_policy.clone()))
  }

  /// `cacheTtlMs` from the step, or the engine default.
  fn cache_ttl(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<Duration, StepError> {
    Ok(
      parameter::<u64>(step, ctx, "cacheTtlMs")?
        .map(Duration::from_millis)
        .unwrap_or(self.cache_ttl),
    )
  }
}

pub(crate) fn register_builtins(
  registry: &ExecutorRegistry,
  backends: &Backends,
  services: &StepServices,
) {
  registry.register(
    StepType::Transform,
    Arc::new(TransformStep::new(backends.transformer.clone())),
  );
  registry.register(
    StepType::Generate,
    Arc::new(GenerateStep::new(backends.prover.clone(), services.clone())),
  );
  registry.register(
    StepType::Verify,
    Arc::new(VerifyStep::new(backends.verifier.clone(), services.clone())),
  );
  registry.register(
    StepType::Share,
    Arc::new(ShareStep::new(backends.sharer.clone())),
  );
}

/// Find a raw parameter value: step configuration, then the step type's
/// workflow input, then shared data.
fn lookup(step: &StepDef, ctx: &WorkflowContext, key: &str) -> Option<Value> {
  step
    .config(key)
    .filter(|v| !v.is_null())
    .or_else(|| ctx.input_field(&step.step_type, key).filter(|v| !v.is_null()))
    .cloned()
    .or_else(|| ctx.shared(key).filter(|v| !v.is_null()))
}

/// Like [`lookup`], decoded into `T`.
fn parameter<T: DeserializeOwned>(
  step: &StepDef,
  ctx: &WorkflowContext,
  key: &str,
) -> Result<Option<T>, StepError> {
  lookup(step, ctx, key)
    .map(|value| {
      serde_json::from_value(value)
        .map_err(|e| StepError::InvalidConfiguration(format!("{}: {}", key, e)))
    })
    .transpose()
}

fn required<T: DeserializeOwned>(
  step: &StepDef,
  ctx: &WorkflowContext,
  key: &str,
) -> Result<T, StepError> {
  parameter(step, ctx, key)?.ok_or_else(|| StepError::MissingInput(key.to_string()))
}

/// A boolean switch from the step configuration only.
fn flag(step: &StepDef, key: &str, default: bool) -> bool {
  step.config(key).and_then(Value::as_bool).unwrap_or(default)
}
