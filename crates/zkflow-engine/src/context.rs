use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use zkflow_config::{ConditionScope, ExpectedStatus, StepType, WorkflowInput};
use zkflow_replay::AntiReplayResult;

use crate::result::{StepResult, StepStatus};

#[derive(Default)]
struct ContextState {
  completed_steps: Vec<String>,
  step_results: HashMap<String, StepResult>,
  statuses: HashMap<String, StepStatus>,
  shared_data: Map<String, Value>,
  replay_checks: HashMap<String, AntiReplayResult>,
}

struct ContextInner {
  workflow_id: String,
  input: WorkflowInput,
  started_at: DateTime<Utc>,
  state: RwLock<ContextState>,
}

/// State of one workflow run, shared by every step of that run.
///
/// Cloning is cheap and every clone sees the same state. Writes made by a
/// step are visible to any step dispatched after it finishes.
#[derive(Clone)]
pub struct WorkflowContext {
  inner: Arc<ContextInner>,
}

impl WorkflowContext {
  pub fn new(workflow_id: impl Into<String>, input: WorkflowInput) -> Self {
    Self {
      inner: Arc::new(ContextInner {
        workflow_id: workflow_id.into(),
        input,
        started_at: Utc::now(),
        state: RwLock::new(ContextState::default()),
      }),
    }
  }

  pub fn workflow_id(&self) -> &str {
    &self.inner.workflow_id
  }

  pub fn started_at(&self) -> DateTime<Utc> {
    self.inner.started_at
  }

  /// The workflow input for a step type, e.g. `input["generate"]`.
  pub fn input(&self, step_type: &StepType) -> Option<&Value> {
    self.inner.input.get(&step_type.input_key())
  }

  /// One field of a step type's input.
  pub fn input_field(&self, step_type: &StepType, key: &str) -> Option<&Value> {
    self.input(step_type).and_then(|v| v.get(key))
  }

  pub fn shared(&self, key: &str) -> Option<Value> {
    self.read(|s| s.shared_data.get(key).cloned())
  }

  pub fn set_shared(&self, key: impl Into<String>, value: Value) {
    self.write(|s| {
      s.shared_data.insert(key.into(), value);
    })
  }

  pub fn shared_data(&self) -> Map<String, Value> {
    self.read(|s| s.shared_data.clone())
  }

  /// Store a terminal result. Completed steps are appended to the
  /// completion order.
  pub fn record_result(&self, result: StepResult) {
    self.write(|s| {
      if result.is_completed() {
        s.completed_steps.push(result.step_id.clone());
      }
      s.statuses.insert(result.step_id.clone(), result.status);
      s.step_results.insert(result.step_id.clone(), result);
    })
  }

  /// Track a step's in-flight status.
  pub fn set_status(&self, step_id: &str, status: StepStatus) {
    self.write(|s| {
      s.statuses.insert(step_id.to_string(), status);
    })
  }

  pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
    self.read(|s| s.statuses.get(step_id).copied())
  }

  pub fn step_result(&self, step_id: &str) -> Option<StepResult> {
    self.read(|s| s.step_results.get(step_id).cloned())
  }

  pub fn step_output(&self, step_id: &str) -> Option<Value> {
    self.read(|s| s.step_results.get(step_id).and_then(|r| r.output.clone()))
  }

  /// Completed steps in the order they completed.
  pub fn completed_steps(&self) -> Vec<String> {
    self.read(|s| s.completed_steps.clone())
  }

  pub fn results(&self) -> HashMap<String, StepResult> {
    self.read(|s| s.step_results.clone())
  }

  /// Replay check already made by a step in this run. Retries reuse it so
  /// a step never flags its own earlier attempt as a replay.
  pub fn replay_check(&self, step_id: &str) -> Option<AntiReplayResult> {
    self.read(|s| s.replay_checks.get(step_id).cloned())
  }

  pub fn set_replay_check(&self, step_id: &str, check: AntiReplayResult) {
    self.write(|s| {
      s.replay_checks.insert(step_id.to_string(), check);
    })
  }

  fn read<T>(&self, f: impl FnOnce(&ContextState) -> T) -> T {
    let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
    f(&state)
  }

  fn write<T>(&self, f: impl FnOnce(&mut ContextState) -> T) -> T {
    let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
    f(&mut state)
  }
}

impl ConditionScope for WorkflowContext {
  fn step_status(&self, step_id: &str) -> Option<ExpectedStatus> {
    self.read(|s| {
      s.step_results
        .get(step_id)
        .and_then(|r| r.status.as_expected())
    })
  }

  fn step_output(&self, step_id: &str) -> Option<Value> {
    WorkflowContext::step_output(self, step_id)
  }
}
