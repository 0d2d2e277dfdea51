//! Step executors and the registry that maps step types to them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use zkflow_config::{StepDef, StepType};

use crate::context::WorkflowContext;
use crate::error::StepError;

/// What a single successful attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
  pub data: Value,
  /// Whether the output came from the cache. `None` for steps that do not
  /// cache.
  pub cache_hit: Option<bool>,
}

impl StepOutput {
  pub fn new(data: Value) -> Self {
    Self {
      data,
      cache_hit: None,
    }
  }

  pub fn cached(data: Value, hit: bool) -> Self {
    Self {
      data,
      cache_hit: Some(hit),
    }
  }
}

/// Runs one attempt of a step.
///
/// Executors are stateless with respect to a run: everything a step reads or
/// publishes goes through the [`WorkflowContext`].
#[async_trait]
pub trait StepExecutor: Send + Sync {
  async fn execute(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<StepOutput, StepError>;
}

/// Adapts an async closure into a [`StepExecutor`].
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
  F: Fn(StepDef, WorkflowContext) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, StepError>> + Send,
{
  async fn execute(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<StepOutput, StepError> {
    (self.0)(step.clone(), ctx.clone())
      .await
      .map(StepOutput::new)
  }
}

/// Step type -> executor.
#[derive(Default)]
pub struct ExecutorRegistry {
  executors: RwLock<HashMap<StepType, Arc<dyn StepExecutor>>>,
}

impl ExecutorRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or replace) the executor for a step type.
  pub fn register(&self, step_type: StepType, executor: Arc<dyn StepExecutor>) {
    let mut executors = self.executors.write().unwrap_or_else(|e| e.into_inner());
    executors.insert(step_type, executor);
  }

  pub fn register_fn<F, Fut>(&self, step_type: StepType, f: F)
  where
    F: Fn(StepDef, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
  {
    self.register(step_type, Arc::new(FnExecutor(f)));
  }

  pub fn resolve(&self, step_type: &StepType) -> Result<Arc<dyn StepExecutor>, StepError> {
    let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
    executors
      .get(step_type)
      .cloned()
      .ok_or_else(|| StepError::UnknownStepType(step_type.to_string()))
  }
}
