//! Error types for workflow execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zkflow_backend::BackendError;
use zkflow_policy::PolicyViolation;
use zkflow_workflow::WorkflowError;

/// Error taxonomy recorded in step and workflow results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  CircularDependency,
  UnknownStepType,
  StepExecution,
  Timeout,
  PolicyViolation,
  ReplayDetected,
  Cache,
  Cancelled,
  DependencyFailed,
}

/// Errors raised while executing a single step.
#[derive(Debug, Clone, Error)]
pub enum StepError {
  /// No executor is registered for the step's type.
  #[error("no executor registered for step type '{0}'")]
  UnknownStepType(String),

  /// The step's configuration cannot be used.
  #[error("invalid configuration: {0}")]
  InvalidConfiguration(String),

  /// A value the step needs was found neither in its configuration, the
  /// workflow input nor the shared data.
  #[error("missing input: {0}")]
  MissingInput(String),

  /// A single attempt ran past its deadline.
  #[error("step timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("policy violation: {}", describe(violations))]
  PolicyViolation { violations: Vec<PolicyViolation> },

  #[error("proof replay detected (fingerprint {fingerprint})")]
  ReplayDetected { fingerprint: String },

  /// The verifier rejected the proof.
  #[error("proof is invalid: {0}")]
  InvalidProof(String),

  #[error(transparent)]
  Backend(#[from] BackendError),

  /// Free-form failure from a custom executor.
  #[error("{0}")]
  Execution(String),

  #[error("step cancelled")]
  Cancelled,
}

fn describe(violations: &[PolicyViolation]) -> String {
  violations
    .iter()
    .map(|v| v.message.as_str())
    .collect::<Vec<_>>()
    .join("; ")
}

impl StepError {
  pub fn execution(message: impl Into<String>) -> Self {
    StepError::Execution(message.into())
  }

  /// Whether another attempt could succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      StepError::Timeout { .. } | StepError::Execution(_) => true,
      StepError::Backend(e) => e.is_retryable(),
      StepError::UnknownStepType(_)
      | StepError::InvalidConfiguration(_)
      | StepError::MissingInput(_)
      | StepError::PolicyViolation { .. }
      | StepError::ReplayDetected { .. }
      | StepError::InvalidProof(_)
      | StepError::Cancelled => false,
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      StepError::UnknownStepType(_) => ErrorKind::UnknownStepType,
      StepError::InvalidConfiguration(_) | StepError::MissingInput(_) => ErrorKind::Validation,
      StepError::Timeout { .. } => ErrorKind::Timeout,
      StepError::PolicyViolation { .. } => ErrorKind::PolicyViolation,
      StepError::ReplayDetected { .. } => ErrorKind::ReplayDetected,
      StepError::InvalidProof(_) | StepError::Backend(_) | StepError::Execution(_) => {
        ErrorKind::StepExecution
      }
      StepError::Cancelled => ErrorKind::Cancelled,
    }
  }
}

/// Errors returned by the orchestrator itself. Step failures never surface
/// here; they are recorded in the [`crate::WorkflowResult`].
#[derive(Debug, Error)]
pub enum EngineError {
  /// The request failed pre-flight validation. Nothing was executed.
  #[error("invalid workflow request: {0}")]
  Validation(WorkflowError),

  /// The step graph has a cycle. Nothing was executed.
  #[error("circular dependency between steps: {}", steps.join(", "))]
  CircularDependency { steps: Vec<String> },

  #[error("workflow '{0}' is already running")]
  DuplicateWorkflow(String),

  #[error("workflow '{0}' not found")]
  NotFound(String),

  /// The background task driving a run ended without a result.
  #[error("workflow '{0}' ended without a result")]
  Abandoned(String),
}

impl EngineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      EngineError::CircularDependency { .. } => ErrorKind::CircularDependency,
      _ => ErrorKind::Validation,
    }
  }
}

impl From<WorkflowError> for EngineError {
  fn from(error: WorkflowError) -> Self {
    match error {
      WorkflowError::CircularDependency { steps } => EngineError::CircularDependency { steps },
      other => EngineError::Validation(other),
    }
  }
}
