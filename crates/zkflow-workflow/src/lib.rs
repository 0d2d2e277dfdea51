//! zkflow Workflow
//!
//! This crate provides the validated workflow representation for zkflow.
//! A [`Workflow`] is built from a [`zkflow_config::WorkflowRequest`] once the
//! step graph has been checked and is ready for execution.
//!
//! Key differences from `zkflow-config`:
//! - Step IDs are unique and every dependency reference is known
//! - The dependency graph is acyclic
//! - Steps are grouped into phases by the [`DependencyScheduler`]
//! - Execution stages are derived for each execution mode

mod error;
mod graph;
mod scheduler;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use scheduler::{DependencyScheduler, Phase};
pub use workflow::{Stage, Workflow};
