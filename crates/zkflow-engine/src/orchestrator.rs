//! Workflow orchestration.
//!
//! The `WorkflowOrchestrator` validates requests, walks their stages and
//! hands each step to the [`RetryController`]. Steps of a concurrent stage
//! run as separate tasks bounded by an orchestrator-wide semaphore; the next
//! stage starts only when all of them are terminal.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zkflow_cache::CacheStore;
use zkflow_config::{
  AuditLevel, ErrorHandling, RetryPolicy, StepDef, StepType, WorkflowRequest,
};
use zkflow_policy::{PolicyEnforcer, ProofValidator};
use zkflow_replay::ReplayDetector;
use zkflow_store::{Json, RunSnapshot, RunStatus, WorkflowPersistence};
use zkflow_workflow::{Stage, Workflow};

use crate::audit::{AuditSink, AuditTrail};
use crate::config::EngineConfig;
use crate::context::WorkflowContext;
use crate::error::{EngineError, StepError};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::executor::{ExecutorRegistry, StepExecutor};
use crate::result::{
  ErrorRecord, SkipReason, StepResult, StepStatus, WorkflowMetrics, WorkflowResult, WorkflowStatus,
};
use crate::retry::RetryController;
use crate::steps::{Backends, StepServices, register_builtins};

/// Lifecycle state of a run known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl RunState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      RunState::Completed | RunState::Failed | RunState::Cancelled
    )
  }
}

impl From<WorkflowStatus> for RunState {
  fn from(status: WorkflowStatus) -> Self {
    match status {
      WorkflowStatus::Completed => RunState::Completed,
      WorkflowStatus::Failed => RunState::Failed,
      WorkflowStatus::Cancelled => RunState::Cancelled,
    }
  }
}

impl From<RunState> for RunStatus {
  fn from(state: RunState) -> Self {
    match state {
      RunState::Pending => RunStatus::Pending,
      RunState::Running => RunStatus::Running,
      RunState::Completed => RunStatus::Completed,
      RunState::Failed => RunStatus::Failed,
      RunState::Cancelled => RunStatus::Cancelled,
    }
  }
}

struct RunEntry {
  state: RunState,
  cancel: CancellationToken,
  ctx: WorkflowContext,
  result: watch::Sender<Option<WorkflowResult>>,
}

/// A validated request with its reservation.
struct PreparedRun {
  workflow: Workflow,
  workflow_id: String,
  ctx: WorkflowContext,
  error_handling: ErrorHandling,
  audit_level: AuditLevel,
  cancel: CancellationToken,
}

/// Forwards events to the orchestrator's notifier and the run's audit trail.
struct RunEmitter<N> {
  notifier: Arc<N>,
  audit: Arc<AuditTrail>,
}

impl<N: ExecutionNotifier> ExecutionNotifier for RunEmitter<N> {
  fn notify(&self, event: ExecutionEvent) {
    self.audit.record(&event);
    self.notifier.notify(event);
  }
}

/// Executes proof workflows.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies. Use `WorkflowOrchestrator::new()` for an orchestrator that
/// discards events, or `WorkflowOrchestrator::with_notifier()` to observe
/// them.
pub struct WorkflowOrchestrator<N: ExecutionNotifier + 'static = NoopNotifier> {
  config: EngineConfig,
  registry: Arc<ExecutorRegistry>,
  cache: Arc<CacheStore>,
  replay: Arc<ReplayDetector>,
  enforcer: Arc<PolicyEnforcer>,
  notifier: Arc<N>,
  retry: RetryController,
  audit_sinks: Vec<Arc<dyn AuditSink>>,
  persistence: Option<Arc<dyn WorkflowPersistence>>,
  permits: Arc<Semaphore>,
  runs: Mutex<HashMap<String, RunEntry>>,
}

impl WorkflowOrchestrator<NoopNotifier> {
  /// Create an orchestrator with no-op notifications.
  pub fn new(config: EngineConfig, backends: Backends) -> Self {
    Self::with_notifier(config, backends, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> WorkflowOrchestrator<N> {
  /// Create an orchestrator with a custom notifier. The built-in
  /// `transform`, `generate`, `verify` and `share` executors are registered
  /// against `backends`.
  pub fn with_notifier(config: EngineConfig, backends: Backends, notifier: N) -> Self {
    let cache = Arc::new(CacheStore::new(config.cache_max_entries, config.cache_ttl()));
    let replay = Arc::new(ReplayDetector::new());
    let enforcer = Arc::new(PolicyEnforcer::new());

    let registry = Arc::new(ExecutorRegistry::new());
    let services = StepServices::new(&config, cache.clone(), replay.clone(), enforcer.clone());
    register_builtins(&registry, &backends, &services);

    Self {
      retry: RetryController::new(config.default_timeout()),
      permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
      config,
      registry,
      cache,
      replay,
      enforcer,
      notifier: Arc::new(notifier),
      audit_sinks: Vec::new(),
      persistence: None,
      runs: Mutex::new(HashMap::new()),
    }
  }

  /// Save a snapshot of every run at each stage boundary and at the end.
  pub fn with_persistence(mut self, persistence: Arc<dyn WorkflowPersistence>) -> Self {
    self.persistence = Some(persistence);
    self
  }

  /// Deliver each run's audit trail to `sink` when the run ends.
  pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
    self.audit_sinks.push(sink);
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn notifier(&self) -> &N {
    &self.notifier
  }

  pub fn cache(&self) -> &Arc<CacheStore> {
    &self.cache
  }

  pub fn replay_detector(&self) -> &Arc<ReplayDetector> {
    &self.replay
  }

  pub fn policy_enforcer(&self) -> &Arc<PolicyEnforcer> {
    &self.enforcer
  }

  pub fn registry(&self) -> &Arc<ExecutorRegistry> {
    &self.registry
  }

  /// Register (or replace) the executor for a step type.
  pub fn register_step_executor(&self, step_type: StepType, executor: Arc<dyn StepExecutor>) {
    self.registry.register(step_type, executor);
  }

  /// Register an async closure as the executor for a step type.
  pub fn register_step_fn<F, Fut>(&self, step_type: StepType, f: F)
  where
    F: Fn(StepDef, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
  {
    self.registry.register_fn(step_type, f);
  }

  /// Register a named validator that policies can refer to.
  pub fn register_validator(&self, name: impl Into<String>, validator: Arc<dyn ProofValidator>) {
    self.enforcer.register_validator(name, validator);
  }

  /// Run a workflow to completion.
  ///
  /// Returns `Err` only when the request is rejected before anything runs.
  /// Step failures are reported in the returned [`WorkflowResult`].
  pub async fn submit(&self, request: WorkflowRequest) -> Result<WorkflowResult, EngineError> {
    let prepared = self.prepare(request)?;
    Ok(self.run(prepared).await)
  }

  /// Start a workflow in the background and return its ID.
  pub fn spawn(self: &Arc<Self>, request: WorkflowRequest) -> Result<String, EngineError> {
    let prepared = self.prepare(request)?;
    let workflow_id = prepared.workflow_id.clone();
    let this = Arc::clone(self);
    tokio::spawn(async move {
      this.run(prepared).await;
    });
    Ok(workflow_id)
  }

  pub fn status(&self, workflow_id: &str) -> Option<RunState> {
    let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    runs.get(workflow_id).map(|r| r.state)
  }

  /// Current status of one step of a known run: `pending` until it is
  /// dispatched, then `running` or `retrying`, then its terminal status.
  pub fn step_status(&self, workflow_id: &str, step_id: &str) -> Option<StepStatus> {
    let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    runs.get(workflow_id).and_then(|r| r.ctx.status_of(step_id))
  }

  /// The final result, once the run has finished.
  pub fn result(&self, workflow_id: &str) -> Option<WorkflowResult> {
    let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    runs
      .get(workflow_id)
      .and_then(|r| r.result.borrow().clone())
  }

  /// Wait for a run to finish.
  pub async fn wait(&self, workflow_id: &str) -> Result<WorkflowResult, EngineError> {
    let mut receiver = {
      let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
      runs
        .get(workflow_id)
        .map(|r| r.result.subscribe())
        .ok_or_else(|| EngineError::NotFound(workflow_id.to_string()))?
    };

    let result = receiver
      .wait_for(Option::is_some)
      .await
      .map_err(|_| EngineError::Abandoned(workflow_id.to_string()))?;
    result
      .clone()
      .ok_or_else(|| EngineError::Abandoned(workflow_id.to_string()))
  }

  /// Request cancellation. Steps already running finish; nothing new is
  /// dispatched. Returns `false` for unknown or finished runs.
  pub fn cancel(&self, workflow_id: &str) -> bool {
    let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    match runs.get(workflow_id) {
      Some(run) if !run.state.is_terminal() => {
        info!(workflow_id = %workflow_id, "workflow_cancel_requested");
        run.cancel.cancel();
        true
      }
      _ => false,
    }
  }

  /// Drop a finished run's bookkeeping. Returns `false` for unknown or
  /// unfinished runs.
  pub fn forget(&self, workflow_id: &str) -> bool {
    let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    if runs.get(workflow_id).is_some_and(|r| r.state.is_terminal()) {
      runs.remove(workflow_id);
      true
    } else {
      false
    }
  }

  /// Start the background cache sweeper and, when a retention is
  /// configured, periodic pruning of replay fingerprints.
  pub fn start_maintenance(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let interval = self.config.cache_sweep_interval();
    let mut handles = vec![self.cache.clone().spawn_sweeper(interval, cancel.clone())];

    let Some(retention) = self.config.replay_retention() else {
      return handles;
    };
    let Ok(retention) = chrono::Duration::from_std(retention) else {
      warn!(?retention, "replay_retention_out_of_range");
      return handles;
    };

    let replay = self.replay.clone();
    handles.push(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = ticker.tick() => {
            if let Some(cutoff) = Utc::now().checked_sub_signed(retention) {
              replay.prune(cutoff);
            }
          }
        }
      }
      debug!("replay_pruner_stopped");
    }));
    handles
  }

  /// Validate a request and reserve its workflow ID. Nothing is emitted
  /// when this fails.
  fn prepare(&self, request: WorkflowRequest) -> Result<PreparedRun, EngineError> {
    let workflow = Workflow::from_request(&request)?;
    let workflow_id = request
      .workflow_id
      .filter(|id| !id.trim().is_empty())
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let cancel = CancellationToken::new();
    let ctx = WorkflowContext::new(workflow_id.clone(), request.input);
    for step in workflow.steps() {
      ctx.set_status(&step.step_id, StepStatus::Pending);
    }
    {
      let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
      if runs.get(&workflow_id).is_some_and(|r| !r.state.is_terminal()) {
        return Err(EngineError::DuplicateWorkflow(workflow_id));
      }
      let (result, _) = watch::channel(None);
      runs.insert(
        workflow_id.clone(),
        RunEntry {
          state: RunState::Pending,
          cancel: cancel.clone(),
          ctx: ctx.clone(),
          result,
        },
      );
    }

    Ok(PreparedRun {
      workflow,
      workflow_id,
      ctx,
      error_handling: request.error_handling,
      audit_level: request.audit_level,
      cancel,
    })
  }

  #[instrument(
    name = "workflow_run",
    skip_all,
    fields(workflow_id = %prepared.workflow_id, mode = ?prepared.workflow.mode())
  )]
  async fn run(&self, prepared: PreparedRun) -> WorkflowResult {
    let PreparedRun {
      workflow,
      workflow_id,
      ctx,
      error_handling,
      audit_level,
      cancel,
    } = prepared;

    self.set_state(&workflow_id, RunState::Running);
    let started = Instant::now();
    let audit = Arc::new(AuditTrail::new(audit_level));
    let emitter = Arc::new(RunEmitter {
      notifier: self.notifier.clone(),
      audit: audit.clone(),
    });

    let stages = workflow.stages();
    info!(
      total_steps = workflow.steps().len(),
      total_stages = stages.len(),
      error_handling = ?error_handling,
      "workflow_started"
    );
    emitter.notify(ExecutionEvent::WorkflowStarted {
      workflow_id: workflow_id.clone(),
      total_steps: workflow.steps().len(),
      at: Utc::now(),
    });
    self
      .persist(&ctx, RunStatus::Running, 0, stages.len())
      .await;

    // Transitive dependents of every failed step.
    let mut blocked: HashSet<String> = HashSet::new();
    let mut halted: Option<SkipReason> = None;

    for (index, stage) in stages.iter().enumerate() {
      if cancel.is_cancelled() {
        halted = Some(SkipReason::Cancelled);
        break;
      }

      let stage_failed = self
        .run_stage(
          &workflow,
          stage,
          &ctx,
          error_handling,
          &cancel,
          &emitter,
          &mut blocked,
        )
        .await;

      self
        .persist(&ctx, RunStatus::Running, index + 1, stages.len())
        .await;

      if cancel.is_cancelled() {
        halted = Some(SkipReason::Cancelled);
        break;
      }
      if stage_failed && error_handling != ErrorHandling::ContinueOnError {
        halted = Some(SkipReason::Aborted);
        break;
      }
    }
    if halted.is_none() && cancel.is_cancelled() {
      halted = Some(SkipReason::Cancelled);
    }

    if let Some(reason) = halted {
      for step in workflow.steps() {
        if ctx.step_result(&step.step_id).is_none() {
          record_skip(&ctx, emitter.as_ref(), step, reason);
        }
      }
    }

    let status = match halted {
      Some(SkipReason::Cancelled) => WorkflowStatus::Cancelled,
      Some(_) => WorkflowStatus::Failed,
      None => WorkflowStatus::Completed,
    };
    let result = self.compile(&workflow, &ctx, status, started, emitter.as_ref(), &audit);

    self.deliver_audit(&result).await;
    self
      .persist(&ctx, RunState::from(status).into(), stages.len(), stages.len())
      .await;
    self.finish(&workflow_id, RunState::from(status), result.clone());
    result
  }

  /// Dispatch one stage and wait for all of its steps. Returns whether any
  /// step of the stage failed.
  #[allow(clippy::too_many_arguments)]
  async fn run_stage(
    &self,
    workflow: &Workflow,
    stage: &Stage,
    ctx: &WorkflowContext,
    error_handling: ErrorHandling,
    cancel: &CancellationToken,
    emitter: &Arc<RunEmitter<N>>,
    blocked: &mut HashSet<String>,
  ) -> bool {
    let mut handles = Vec::with_capacity(stage.steps.len());
    let mut dispatched = Vec::with_capacity(stage.steps.len());
    let mut failed = false;

    for step_id in &stage.steps {
      let Some(step) = workflow.get_step(step_id) else {
        continue;
      };

      if !step.enabled {
        record_skip(ctx, emitter.as_ref(), step, SkipReason::Disabled);
        continue;
      }
      if blocked.contains(&step.step_id) {
        record_skip(ctx, emitter.as_ref(), step, SkipReason::DependencyFailed);
        continue;
      }
      if step.condition.as_ref().is_some_and(|c| !c.evaluate(ctx)) {
        record_skip(ctx, emitter.as_ref(), step, SkipReason::ConditionNotMet);
        continue;
      }

      let executor = match self.registry.resolve(&step.step_type) {
        Ok(executor) => executor,
        Err(e) => {
          error!(step_id = %step.step_id, error = %e, "step_rejected");
          let result = StepResult::rejected(&step.step_id, &step.step_type, &e);
          emitter.notify(ExecutionEvent::StepFailed {
            workflow_id: ctx.workflow_id().to_string(),
            step_id: step.step_id.clone(),
            error: e.to_string(),
            at: Utc::now(),
          });
          ctx.record_result(result);
          blocked.extend(workflow.dependents_of(&step.step_id));
          failed = true;
          continue;
        }
      };

      let policy = self.retry_policy(step, error_handling);
      let step = step.clone();
      let retry = self.retry.clone();
      let ctx = ctx.clone();
      let cancel = cancel.clone();
      let emitter = emitter.clone();
      let permits = self.permits.clone();

      dispatched.push((step.step_id.clone(), step.step_type.clone()));
      handles.push(tokio::spawn(async move {
        let _permit = permits.acquire_owned().await.ok();
        if cancel.is_cancelled() {
          return skipped_result(&ctx, emitter.as_ref(), &step, SkipReason::Cancelled);
        }
        retry
          .execute(&step, policy, &ctx, executor, &cancel, emitter.as_ref())
          .await
      }));
    }

    let joined = futures::future::join_all(handles).await;
    for ((step_id, step_type), outcome) in dispatched.into_iter().zip(joined) {
      let result = match outcome {
        Ok(result) => result,
        Err(e) => {
          error!(step_id = %step_id, error = %e, "step_task_failed");
          let error = StepError::execution(format!("step task failed: {}", e));
          emitter.notify(ExecutionEvent::StepFailed {
            workflow_id: ctx.workflow_id().to_string(),
            step_id: step_id.clone(),
            error: error.to_string(),
            at: Utc::now(),
          });
          StepResult::rejected(&step_id, &step_type, &error)
        }
      };

      if result.is_failed() {
        blocked.extend(workflow.dependents_of(&step_id));
        failed = true;
      }
      ctx.record_result(result);
    }

    failed
  }

  /// Steps without retries inherit the engine default under
  /// `retry_on_error`.
  fn retry_policy(&self, step: &StepDef, error_handling: ErrorHandling) -> RetryPolicy {
    if error_handling == ErrorHandling::RetryOnError && step.retry.max_retries == 0 {
      self.config.default_retry
    } else {
      step.retry
    }
  }

  fn compile(
    &self,
    workflow: &Workflow,
    ctx: &WorkflowContext,
    status: WorkflowStatus,
    started: Instant,
    emitter: &RunEmitter<N>,
    audit: &AuditTrail,
  ) -> WorkflowResult {
    let workflow_id = ctx.workflow_id().to_string();
    let results: BTreeMap<String, StepResult> = ctx.results().into_iter().collect();

    let errors: Vec<ErrorRecord> = workflow
      .steps()
      .iter()
      .filter_map(|step| results.get(&step.step_id))
      .filter(|r| r.status == StepStatus::Failed)
      .filter_map(|r| {
        r.error.as_ref().map(|e| ErrorRecord {
          step_id: Some(r.step_id.clone()),
          kind: e.kind,
          message: e.message.clone(),
        })
      })
      .collect();

    let count = |status: StepStatus| results.values().filter(|r| r.status == status).count();
    let metrics = WorkflowMetrics {
      total_steps: workflow.steps().len(),
      completed_steps: count(StepStatus::Completed),
      failed_steps: count(StepStatus::Failed),
      skipped_steps: count(StepStatus::Skipped),
      total_execution_time_ms: started.elapsed().as_millis() as u64,
    };

    let completed_at = Utc::now();
    match status {
      WorkflowStatus::Completed => {
        info!(
          completed = metrics.completed_steps,
          failed = metrics.failed_steps,
          skipped = metrics.skipped_steps,
          execution_time_ms = metrics.total_execution_time_ms,
          "workflow_completed"
        );
        emitter.notify(ExecutionEvent::WorkflowCompleted {
          workflow_id: workflow_id.clone(),
          at: completed_at,
        });
      }
      WorkflowStatus::Failed => {
        let message = errors
          .first()
          .map(|e| {
            format!(
              "step '{}' failed: {}",
              e.step_id.as_deref().unwrap_or_default(),
              e.message
            )
          })
          .unwrap_or_else(|| "workflow failed".to_string());
        error!(error = %message, "workflow_failed");
        emitter.notify(ExecutionEvent::WorkflowFailed {
          workflow_id: workflow_id.clone(),
          error: message,
          at: completed_at,
        });
      }
      WorkflowStatus::Cancelled => {
        warn!(completed = metrics.completed_steps, "workflow_cancelled");
        emitter.notify(ExecutionEvent::WorkflowCancelled {
          workflow_id: workflow_id.clone(),
          at: completed_at,
        });
      }
    }

    WorkflowResult {
      workflow_id,
      status,
      results,
      errors,
      metrics,
      shared_data: ctx.shared_data(),
      audit_trail: audit.entries(),
      started_at: ctx.started_at(),
      completed_at,
    }
  }

  async fn deliver_audit(&self, result: &WorkflowResult) {
    for sink in &self.audit_sinks {
      for entry in &result.audit_trail {
        if let Err(e) = sink.record(entry).await {
          warn!(error = %e, action = %entry.action, "audit_delivery_failed");
        }
      }
    }
  }

  async fn persist(
    &self,
    ctx: &WorkflowContext,
    status: RunStatus,
    stages_completed: usize,
    total_stages: usize,
  ) {
    let Some(persistence) = &self.persistence else {
      return;
    };

    let results: BTreeMap<String, StepResult> = ctx.results().into_iter().collect();
    let snapshot = RunSnapshot {
      workflow_id: ctx.workflow_id().to_string(),
      status,
      stages_completed: stages_completed as i64,
      total_stages: total_stages as i64,
      started_at: ctx.started_at(),
      updated_at: Utc::now(),
      step_results: Json(serde_json::to_value(results).unwrap_or(Value::Null)),
      shared_data: Json(Value::Object(ctx.shared_data())),
    };

    if let Err(e) = persistence.save(&snapshot).await {
      warn!(error = %e, stages_completed, "snapshot_persist_failed");
    }
  }

  fn set_state(&self, workflow_id: &str, state: RunState) {
    let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(run) = runs.get_mut(workflow_id) {
      run.state = state;
    }
  }

  fn finish(&self, workflow_id: &str, state: RunState, result: WorkflowResult) {
    let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(run) = runs.get_mut(workflow_id) {
      run.state = state;
      run.result.send_replace(Some(result));
    }
  }
}

fn skipped_result(
  ctx: &WorkflowContext,
  notifier: &dyn ExecutionNotifier,
  step: &StepDef,
  reason: SkipReason,
) -> StepResult {
  debug!(step_id = %step.step_id, ?reason, "step_skipped");
  notifier.notify(ExecutionEvent::StepSkipped {
    workflow_id: ctx.workflow_id().to_string(),
    step_id: step.step_id.clone(),
    reason,
    at: Utc::now(),
  });
  StepResult::skipped(&step.step_id, &step.step_type, reason)
}

fn record_skip(
  ctx: &WorkflowContext,
  notifier: &dyn ExecutionNotifier,
  step: &StepDef,
  reason: SkipReason,
) {
  ctx.record_result(skipped_result(ctx, notifier, step, reason));
}
