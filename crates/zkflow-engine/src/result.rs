use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zkflow_config::{ExpectedStatus, StepType};

use crate::audit::AuditEntry;
use crate::error::{ErrorKind, StepError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Skipped,
  Retrying,
}

impl StepStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
    )
  }

  /// The status as seen by step conditions. `None` while not terminal.
  pub fn as_expected(self) -> Option<ExpectedStatus> {
    match self {
      StepStatus::Completed => Some(ExpectedStatus::Completed),
      StepStatus::Failed => Some(ExpectedStatus::Failed),
      StepStatus::Skipped => Some(ExpectedStatus::Skipped),
      _ => None,
    }
  }
}

/// Why a step never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  /// `enabled: false`.
  Disabled,
  /// The step's condition evaluated false.
  ConditionNotMet,
  /// A direct or transitive dependency failed.
  DependencyFailed,
  /// An earlier failure stopped the run.
  Aborted,
  /// The run was cancelled before the step was dispatched.
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
  pub kind: ErrorKind,
  pub message: String,
}

impl From<&StepError> for ErrorInfo {
  fn from(error: &StepError) -> Self {
    Self {
      kind: error.kind(),
      message: error.to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetrics {
  pub execution_time_ms: u64,
  /// Size of the serialized output in bytes.
  pub output_size: usize,
  pub attempts: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cache_hit: Option<bool>,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
  pub step_id: String,
  pub step_type: StepType,
  pub status: StepStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub skip_reason: Option<SkipReason>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  pub retry_count: u32,
  pub metrics: StepMetrics,
}

impl StepResult {
  pub fn skipped(step_id: &str, step_type: &StepType, reason: SkipReason) -> Self {
    let now = Utc::now();
    Self {
      step_id: step_id.to_string(),
      step_type: step_type.clone(),
      status: StepStatus::Skipped,
      output: None,
      error: None,
      skip_reason: Some(reason),
      start_time: None,
      end_time: Some(now),
      retry_count: 0,
      metrics: StepMetrics::default(),
    }
  }

  /// A failure that happened before any attempt started.
  pub fn rejected(step_id: &str, step_type: &StepType, error: &StepError) -> Self {
    let now = Utc::now();
    Self {
      step_id: step_id.to_string(),
      step_type: step_type.clone(),
      status: StepStatus::Failed,
      output: None,
      error: Some(error.into()),
      skip_reason: None,
      start_time: Some(now),
      end_time: Some(now),
      retry_count: 0,
      metrics: StepMetrics::default(),
    }
  }

  pub fn is_completed(&self) -> bool {
    self.status == StepStatus::Completed
  }

  pub fn is_failed(&self) -> bool {
    self.status == StepStatus::Failed
  }

  pub fn is_skipped(&self) -> bool {
    self.status == StepStatus::Skipped
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Completed,
  Failed,
  Cancelled,
}

/// A step failure, as listed in [`WorkflowResult::errors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_id: Option<String>,
  pub kind: ErrorKind,
  pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetrics {
  pub total_steps: usize,
  pub completed_steps: usize,
  pub failed_steps: usize,
  pub skipped_steps: usize,
  pub total_execution_time_ms: u64,
}

/// Final outcome of a workflow run. Every step of the request appears in
/// `results` with a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
  pub workflow_id: String,
  pub status: WorkflowStatus,
  pub results: BTreeMap<String, StepResult>,
  pub errors: Vec<ErrorRecord>,
  pub metrics: WorkflowMetrics,
  pub shared_data: serde_json::Map<String, Value>,
  pub audit_trail: Vec<AuditEntry>,
  pub started_at: DateTime<Utc>,
  pub completed_at: DateTime<Utc>,
}

impl WorkflowResult {
  pub fn step(&self, step_id: &str) -> Option<&StepResult> {
    self.results.get(step_id)
  }

  pub fn is_completed(&self) -> bool {
    self.status == WorkflowStatus::Completed
  }

  /// Step IDs with the given status, sorted.
  pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
    self
      .results
      .values()
      .filter(|r| r.status == status)
      .map(|r| r.step_id.as_str())
      .collect()
  }
}
