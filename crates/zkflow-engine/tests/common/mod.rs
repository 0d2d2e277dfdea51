//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use zkflow_backend::mock::{MockProver, MockSharer, MockTransformer, MockVerifier};
use zkflow_engine::{
  Backends, EngineConfig, ExecutionEvent, StepDef, StepError, StepType, WorkflowContext,
  WorkflowOrchestrator,
};

/// Mock backends with handles kept for assertions.
pub struct Mocks {
  pub prover: Arc<MockProver>,
  pub verifier: Arc<MockVerifier>,
  pub sharer: Arc<MockSharer>,
}

impl Mocks {
  pub fn new() -> Self {
    Self {
      prover: Arc::new(MockProver::new()),
      verifier: Arc::new(MockVerifier::new()),
      sharer: Arc::new(MockSharer::new()),
    }
  }

  pub fn backends(&self) -> Backends {
    Backends {
      transformer: Arc::new(MockTransformer),
      prover: self.prover.clone(),
      verifier: self.verifier.clone(),
      sharer: self.sharer.clone(),
    }
  }
}

pub fn fast_config() -> EngineConfig {
  let mut config = EngineConfig::default();
  config.default_retry.delay_ms = 1;
  config.default_timeout_ms = 5_000;
  config
}

/// Register `custom:ok`, `custom:fail` and `custom:slow` on an orchestrator.
///
/// `ok` echoes its step ID, `fail` always fails with a retryable error and
/// `slow` sleeps for `configuration.ms` before succeeding. Returns a
/// counter of executed attempts across all three.
pub fn register_test_steps<N>(orchestrator: &WorkflowOrchestrator<N>) -> Arc<AtomicUsize>
where
  N: zkflow_engine::ExecutionNotifier + 'static,
{
  let attempts = Arc::new(AtomicUsize::new(0));

  let counter = attempts.clone();
  orchestrator.register_step_fn(StepType::custom("ok"), move |step: StepDef, _ctx: WorkflowContext| {
    counter.fetch_add(1, Ordering::SeqCst);
    async move { Ok::<Value, StepError>(json!({ "step": step.step_id, "ok": true })) }
  });

  let counter = attempts.clone();
  orchestrator.register_step_fn(StepType::custom("fail"), move |step: StepDef, _ctx: WorkflowContext| {
    counter.fetch_add(1, Ordering::SeqCst);
    async move { Err::<Value, StepError>(StepError::execution(format!("{} broke", step.step_id))) }
  });

  let counter = attempts.clone();
  orchestrator.register_step_fn(StepType::custom("slow"), move |step: StepDef, _ctx: WorkflowContext| {
    counter.fetch_add(1, Ordering::SeqCst);
    let ms = step.config("ms").and_then(Value::as_u64).unwrap_or(50);
    async move {
      tokio::time::sleep(Duration::from_millis(ms)).await;
      Ok::<Value, StepError>(json!({ "step": step.step_id }))
    }
  });

  attempts
}

pub fn ok(id: &str) -> StepDef {
  StepDef::new(id, StepType::custom("ok"))
}

pub fn fail(id: &str) -> StepDef {
  StepDef::new(id, StepType::custom("fail"))
}

pub fn slow(id: &str, ms: u64) -> StepDef {
  StepDef::new(id, StepType::custom("slow")).with_configuration(json!({ "ms": ms }))
}

/// Drain every event currently queued on a channel.
pub fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut events = Vec::new();
  while let Ok(event) = receiver.try_recv() {
    events.push(event);
  }
  events
}
