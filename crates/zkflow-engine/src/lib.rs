//! zkflow Engine
//!
//! This crate provides the orchestration engine for zkflow proof workflows:
//! a request of steps (transform credentials, generate a proof, verify it,
//! share it, or any registered custom step) is validated, scheduled into
//! stages and executed with retries, caching, replay detection and policy
//! checks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowOrchestrator                      │
//! │  - submit(request) / spawn(request) → WorkflowResult        │
//! │  - validation, stage walk, error handling, cancellation     │
//! │  - events → ExecutionNotifier, audit trail, persistence     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RetryController                          │
//! │  - per-attempt timeout, backoff, retry budget               │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ExecutorRegistry / StepExecutor             │
//! │  - transform, generate, verify, share, custom:<name>        │
//! │  - CacheStore, ReplayDetector, PolicyEnforcer, backends     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use zkflow_engine::{Backends, EngineConfig, WorkflowOrchestrator};
//!
//! let orchestrator = WorkflowOrchestrator::new(EngineConfig::default(), Backends::mock());
//! let request: WorkflowRequest = serde_json::from_str(&json)?;
//! let result = orchestrator.submit(request).await?;
//! println!("{:?}", result.status);
//! ```

mod audit;
mod config;
mod context;
mod error;
mod events;
mod executor;
mod orchestrator;
mod result;
mod retry;
mod steps;

pub use audit::{AuditEntry, AuditError, AuditSink, AuditTrail, MemoryAuditSink};
pub use config::EngineConfig;
pub use context::WorkflowContext;
pub use error::{EngineError, ErrorKind, StepError};
pub use events::{
  BroadcastNotifier, ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier,
  NotificationError, NotificationSink, spawn_notification_forwarder,
};
pub use executor::{ExecutorRegistry, FnExecutor, StepExecutor, StepOutput};
pub use orchestrator::{RunState, WorkflowOrchestrator};
pub use result::{
  ErrorInfo, ErrorRecord, SkipReason, StepMetrics, StepResult, StepStatus, WorkflowMetrics,
  WorkflowResult, WorkflowStatus,
};
pub use retry::RetryController;
pub use steps::{Backends, GenerateStep, ShareStep, TransformStep, VerifyStep};

// Re-export the request model so callers need only this crate.
pub use zkflow_config::{
  AuditLevel, Condition, ErrorHandling, ExecutionMode, ExpectedStatus, RetryBackoff, RetryPolicy,
  StepDef, StepType, WorkflowInput, WorkflowRequest,
};
pub use zkflow_policy::{CompliancePolicy, Enforcement, FnValidator, ProofValidator};
