//! Per-step attempt loop: timeouts, retries and backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use zkflow_config::{RetryPolicy, StepDef};

use crate::context::WorkflowContext;
use crate::error::StepError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::executor::{StepExecutor, StepOutput};
use crate::result::{ErrorInfo, StepMetrics, StepResult, StepStatus};

/// Runs a step's attempts until one succeeds, a non-retryable error occurs,
/// the retry budget is spent or the run is cancelled.
#[derive(Debug, Clone)]
pub struct RetryController {
  default_timeout: Duration,
}

impl RetryController {
  pub fn new(default_timeout: Duration) -> Self {
    Self { default_timeout }
  }

  pub fn timeout_for(&self, step: &StepDef) -> Duration {
    step
      .timeout_ms
      .map(Duration::from_millis)
      .unwrap_or(self.default_timeout)
  }

  /// Execute `step`, retrying per `policy`. Always returns a terminal
  /// result; failures are reported in it, never as an `Err`.
  #[instrument(
    name = "step_execute",
    skip_all,
    fields(workflow_id = %ctx.workflow_id(), step_id = %step.step_id)
  )]
  pub async fn execute(
    &self,
    step: &StepDef,
    policy: RetryPolicy,
    ctx: &WorkflowContext,
    executor: Arc<dyn StepExecutor>,
    cancel: &CancellationToken,
    notifier: &dyn ExecutionNotifier,
  ) -> StepResult {
    let start_time = Utc::now();
    let started = Instant::now();
    let timeout = self.timeout_for(step);

    ctx.set_status(&step.step_id, StepStatus::Running);
    notifier.notify(ExecutionEvent::StepStarted {
      workflow_id: ctx.workflow_id().to_string(),
      step_id: step.step_id.clone(),
      at: start_time,
    });

    let mut retry_count = 0u32;
    let outcome: Result<StepOutput, StepError> = loop {
      let attempt = match tokio::time::timeout(timeout, executor.execute(step, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(StepError::Timeout {
          timeout_ms: timeout.as_millis() as u64,
        }),
      };

      let error = match attempt {
        Ok(output) => break Ok(output),
        Err(e) => e,
      };

      if !error.is_retryable() || retry_count >= policy.max_retries || cancel.is_cancelled() {
        break Err(error);
      }

      let delay_ms = policy.delay_for_retry(retry_count);
      warn!(
        attempt = retry_count + 1,
        delay_ms,
        error = %error,
        "step_retrying"
      );
      notifier.notify(ExecutionEvent::StepRetrying {
        workflow_id: ctx.workflow_id().to_string(),
        step_id: step.step_id.clone(),
        attempt: retry_count + 1,
        delay_ms,
        error: error.to_string(),
        at: Utc::now(),
      });

      ctx.set_status(&step.step_id, StepStatus::Retrying);
      tokio::select! {
        _ = cancel.cancelled() => {
          debug!("retry_abandoned_on_cancel");
          break Err(error);
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
      }
      ctx.set_status(&step.step_id, StepStatus::Running);
      retry_count += 1;
    };

    let end_time = Utc::now();
    let execution_time_ms = started.elapsed().as_millis() as u64;
    let mut result = StepResult {
      step_id: step.step_id.clone(),
      step_type: step.step_type.clone(),
      status: StepStatus::Failed,
      output: None,
      error: None,
      skip_reason: None,
      start_time: Some(start_time),
      end_time: Some(end_time),
      retry_count,
      metrics: StepMetrics {
        execution_time_ms,
        output_size: 0,
        attempts: retry_count + 1,
        cache_hit: None,
      },
    };

    match outcome {
      Ok(output) => {
        result.status = StepStatus::Completed;
        result.metrics.output_size = serde_json::to_vec(&output.data)
          .map(|bytes| bytes.len())
          .unwrap_or(0);
        result.metrics.cache_hit = output.cache_hit;
        debug!(execution_time_ms, attempts = retry_count + 1, "step_completed");
        notifier.notify(ExecutionEvent::StepCompleted {
          workflow_id: ctx.workflow_id().to_string(),
          step_id: step.step_id.clone(),
          data: output.data.clone(),
          at: end_time,
        });
        result.output = Some(output.data);
      }
      Err(e) => {
        error!(error = %e, retry_count, "step_failed");
        notifier.notify(ExecutionEvent::StepFailed {
          workflow_id: ctx.workflow_id().to_string(),
          step_id: step.step_id.clone(),
          error: e.to_string(),
          at: end_time,
        });
        result.error = Some(ErrorInfo::from(&e));
      }
    }

    ctx.set_status(&step.step_id, result.status);
    result
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;
  use crate::error::ErrorKind;
  use crate::events::ChannelNotifier;
  use crate::executor::FnExecutor;
  use serde_json::{Value, json};
  use zkflow_config::{StepType, WorkflowInput};

  fn context() -> WorkflowContext {
    WorkflowContext::new("wf", WorkflowInput::new())
  }

  /// Fails `failures` times with `error`, then succeeds.
  fn flaky(failures: u32, error: StepError) -> (Arc<AtomicU32>, Arc<dyn StepExecutor>) {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let executor = FnExecutor(move |_step: StepDef, _ctx: WorkflowContext| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      let error = error.clone();
      async move {
        if n < failures {
          Err(error)
        } else {
          Ok(json!({"attempt": n + 1}))
        }
      }
    });
    (attempts, Arc::new(executor))
  }

  fn step() -> StepDef {
    StepDef::new("work", StepType::custom("work"))
  }

  #[tokio::test]
  async fn test_retries_until_success() {
    let (attempts, executor) = flaky(2, StepError::execution("flaky"));
    let (notifier, mut events) = ChannelNotifier::channel();
    let controller = RetryController::new(Duration::from_secs(5));

    let result = controller
      .execute(
        &step(),
        RetryPolicy::new(3, 1),
        &context(),
        executor,
        &CancellationToken::new(),
        &notifier,
      )
      .await;

    assert_eq!(result.status, StepStatus::Completed);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.metrics.attempts, 3);
    assert_eq!(result.output, Some(json!({"attempt": 3})));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    drop(notifier);
    let mut names = Vec::new();
    while let Some(event) = events.recv().await {
      names.push(event.name());
    }
    assert_eq!(
      names,
      vec![
        "step:started",
        "step:retrying",
        "step:retrying",
        "step:completed"
      ]
    );
  }

  #[tokio::test]
  async fn test_retry_budget_is_bounded() {
    let (attempts, executor) = flaky(u32::MAX, StepError::execution("always"));
    let controller = RetryController::new(Duration::from_secs(5));

    let result = controller
      .execute(
        &step(),
        RetryPolicy::new(2, 1),
        &context(),
        executor,
        &CancellationToken::new(),
        &crate::events::NoopNotifier,
      )
      .await;

    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.retry_count, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(result.error.unwrap().message, "always");
  }

  #[tokio::test]
  async fn test_non_retryable_fails_immediately() {
    let (attempts, executor) = flaky(
      u32::MAX,
      StepError::ReplayDetected {
        fingerprint: "ab".into(),
      },
    );
    let controller = RetryController::new(Duration::from_secs(5));

    let result = controller
      .execute(
        &step(),
        RetryPolicy::new(5, 1),
        &context(),
        executor,
        &CancellationToken::new(),
        &crate::events::NoopNotifier,
      )
      .await;

    assert_eq!(result.retry_count, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(result.error.unwrap().kind, ErrorKind::ReplayDetected);
  }

  #[tokio::test]
  async fn test_timeout_is_reported() {
    let executor: Arc<dyn StepExecutor> = Arc::new(FnExecutor(|_s: StepDef, _c: WorkflowContext| async {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok::<Value, StepError>(Value::Null)
    }));
    let controller = RetryController::new(Duration::from_secs(60));

    let result = controller
      .execute(
        &step().with_timeout_ms(20),
        RetryPolicy::default(),
        &context(),
        executor,
        &CancellationToken::new(),
        &crate::events::NoopNotifier,
      )
      .await;

    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Timeout);
  }

  #[tokio::test]
  async fn test_cancelled_run_starts_no_retries() {
    let (attempts, executor) = flaky(u32::MAX, StepError::execution("down"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = RetryController::new(Duration::from_secs(5))
      .execute(
        &step(),
        RetryPolicy::new(3, 1),
        &context(),
        executor,
        &cancel,
        &crate::events::NoopNotifier,
      )
      .await;

    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
  }
}
