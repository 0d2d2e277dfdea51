//! zkflow Config
//!
//! This crate contains the serializable request types for zkflow. A
//! [`WorkflowRequest`] describes a proof pipeline as a list of steps with
//! dependencies, an execution mode and an error handling policy.
//!
//! Requests are loaded from:
//! - JSON files (via the CLI, `zkflow run request.json`)
//! - Callers constructing them directly in Rust
//!
//! The `zkflow-workflow` crate validates a request and turns it into an
//! executable plan.

mod condition;
mod enums;
mod request;
mod step;
mod step_type;

pub use condition::{Condition, ConditionScope, ExpectedStatus};
pub use enums::{AuditLevel, ErrorHandling, ExecutionMode, RetryBackoff};
pub use request::{WorkflowInput, WorkflowRequest};
pub use step::{RetryPolicy, StepDef};
pub use step_type::{StepType, StepTypeParseError};
