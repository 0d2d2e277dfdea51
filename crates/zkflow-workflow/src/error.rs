use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
  #[error("workflow has no steps")]
  NoSteps,

  #[error("execution mode is required")]
  MissingExecutionMode,

  #[error("step at position {0} has an empty step id")]
  EmptyStepId(usize),

  #[error("duplicate step id: {0}")]
  DuplicateStep(String),

  #[error("step depends on itself: {0}")]
  SelfDependency(String),

  #[error("step {step} depends on unknown step {dependency}")]
  UnknownDependency { step: String, dependency: String },

  #[error("condition on step {step} references unknown step {referenced}")]
  UnknownConditionStep { step: String, referenced: String },

  #[error("condition on step {step} references {referenced}, which is not one of its dependencies")]
  ConditionNotUpstream { step: String, referenced: String },

  #[error("circular dependency between steps: {}", steps.join(", "))]
  CircularDependency { steps: Vec<String> },
}

impl WorkflowError {
  pub fn is_cycle(&self) -> bool {
    matches!(self, WorkflowError::CircularDependency { .. })
  }
}
