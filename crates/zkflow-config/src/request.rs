use serde::{Deserialize, Serialize};

use crate::enums::{AuditLevel, ErrorHandling, ExecutionMode};
use crate::step::StepDef;
use crate::step_type::StepType;

/// Opaque workflow payload, keyed by step type (`"transform"`, `"generate"`, ...).
pub type WorkflowInput = serde_json::Map<String, serde_json::Value>;

/// A request to run a proof workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
  /// Caller-chosen run ID. A UUID is generated when absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow_id: Option<String>,
  pub steps: Vec<StepDef>,
  /// Required; kept optional here so a missing mode is reported as a
  /// validation error rather than a parse error.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub execution_mode: Option<ExecutionMode>,
  #[serde(default)]
  pub error_handling: ErrorHandling,
  #[serde(default)]
  pub input: WorkflowInput,
  #[serde(default)]
  pub audit_level: AuditLevel,
}

impl WorkflowRequest {
  pub fn new(execution_mode: ExecutionMode, steps: Vec<StepDef>) -> Self {
    Self {
      workflow_id: None,
      steps,
      execution_mode: Some(execution_mode),
      error_handling: ErrorHandling::default(),
      input: WorkflowInput::new(),
      audit_level: AuditLevel::default(),
    }
  }

  pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
    self.workflow_id = Some(workflow_id.into());
    self
  }

  pub fn with_error_handling(mut self, error_handling: ErrorHandling) -> Self {
    self.error_handling = error_handling;
    self
  }

  pub fn with_audit_level(mut self, audit_level: AuditLevel) -> Self {
    self.audit_level = audit_level;
    self
  }

  /// Set the input slice for one step type.
  pub fn with_input(mut self, step_type: &StepType, value: serde_json::Value) -> Self {
    self.input.insert(step_type.input_key(), value);
    self
  }
}
