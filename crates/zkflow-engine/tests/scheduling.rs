//! Stage scheduling, error handling and run lifecycle.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Mocks, drain, fail, fast_config, ok, register_test_steps, slow};
use serde_json::{Value, json};
use zkflow_engine::{
  ChannelNotifier, Condition, EngineError, ErrorHandling, ErrorKind, ExecutionEvent, ExecutionMode,
  ExpectedStatus, RetryPolicy, RunState, SkipReason, StepDef, StepError, StepStatus, StepType,
  WorkflowContext, WorkflowOrchestrator, WorkflowRequest, WorkflowStatus,
};

fn request(mode: ExecutionMode, steps: Vec<StepDef>) -> WorkflowRequest {
  WorkflowRequest::new(mode, steps)
}

fn completion_order(events: &[ExecutionEvent]) -> Vec<String> {
  events
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::StepCompleted { step_id, .. } => Some(step_id.clone()),
      _ => None,
    })
    .collect()
}

#[tokio::test]
async fn test_cycle_is_rejected_before_anything_runs() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let orchestrator = WorkflowOrchestrator::with_notifier(fast_config(), Mocks::new().backends(), notifier);
  let attempts = register_test_steps(&orchestrator);

  let err = orchestrator
    .submit(
      request(
        ExecutionMode::Parallel,
        vec![
          ok("A").depends_on(["C"]),
          ok("B").depends_on(["A"]),
          ok("C").depends_on(["B"]),
        ],
      )
      .with_workflow_id("cyclic"),
    )
    .await
    .unwrap_err();

  match &err {
    EngineError::CircularDependency { steps } => assert_eq!(steps, &["A", "B", "C"]),
    other => panic!("expected circular dependency, got {:?}", other),
  }
  assert_eq!(err.kind(), ErrorKind::CircularDependency);
  assert_eq!(attempts.load(Ordering::SeqCst), 0);
  assert!(drain(&mut events).is_empty());
  assert_eq!(orchestrator.status("cyclic"), None);
}

#[tokio::test]
async fn test_unknown_dependency_is_a_validation_error() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());

  let err = orchestrator
    .submit(request(
      ExecutionMode::Sequential,
      vec![ok("a").depends_on(["ghost"])],
    ))
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Validation);
  assert!(err.to_string().contains("ghost"), "{}", err);
}

#[tokio::test]
async fn test_retry_budget_bounds_attempts() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  let attempts = register_test_steps(&orchestrator);

  let result = orchestrator
    .submit(request(
      ExecutionMode::Sequential,
      vec![fail("flaky").with_retry(RetryPolicy::new(2, 1))],
    ))
    .await
    .unwrap();

  let step = result.step("flaky").unwrap();
  assert_eq!(step.status, StepStatus::Failed);
  assert_eq!(step.retry_count, 2);
  assert_eq!(step.metrics.attempts, 3);
  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  assert_eq!(result.status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn test_retry_on_error_applies_default_retry() {
  let config = fast_config();
  let default_retries = config.default_retry.max_retries;
  let orchestrator = WorkflowOrchestrator::new(config, Mocks::new().backends());
  let attempts = register_test_steps(&orchestrator);

  let result = orchestrator
    .submit(
      request(ExecutionMode::Sequential, vec![fail("flaky")])
        .with_error_handling(ErrorHandling::RetryOnError),
    )
    .await
    .unwrap();

  assert_eq!(result.step("flaky").unwrap().retry_count, default_retries);
  assert_eq!(
    attempts.load(Ordering::SeqCst),
    default_retries as usize + 1
  );
}

#[tokio::test]
async fn test_fail_fast_lets_siblings_finish() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  register_test_steps(&orchestrator);

  let result = orchestrator
    .submit(request(
      ExecutionMode::Parallel,
      vec![
        fail("broken"),
        slow("sibling", 30),
        ok("downstream").depends_on(["sibling"]),
      ],
    ))
    .await
    .unwrap();

  assert_eq!(result.status, WorkflowStatus::Failed);
  assert_eq!(result.step("broken").unwrap().status, StepStatus::Failed);
  assert_eq!(result.step("sibling").unwrap().status, StepStatus::Completed);

  let downstream = result.step("downstream").unwrap();
  assert_eq!(downstream.status, StepStatus::Skipped);
  assert_eq!(downstream.skip_reason, Some(SkipReason::Aborted));

  assert_eq!(result.errors.len(), 1);
  assert_eq!(result.errors[0].step_id.as_deref(), Some("broken"));
  assert_eq!(result.metrics.skipped_steps, 1);
}

#[tokio::test]
async fn test_continue_on_error_skips_only_dependents() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  register_test_steps(&orchestrator);

  let result = orchestrator
    .submit(
      request(
        ExecutionMode::Parallel,
        vec![
          fail("a"),
          ok("b").depends_on(["a"]),
          ok("c").depends_on(["b"]),
          ok("d"),
          ok("e").depends_on(["d"]),
        ],
      )
      .with_error_handling(ErrorHandling::ContinueOnError),
    )
    .await
    .unwrap();

  assert_eq!(result.status, WorkflowStatus::Completed);
  assert_eq!(result.step("a").unwrap().status, StepStatus::Failed);
  for dependent in ["b", "c"] {
    let step = result.step(dependent).unwrap();
    assert_eq!(step.status, StepStatus::Skipped, "{dependent}");
    assert_eq!(step.skip_reason, Some(SkipReason::DependencyFailed), "{dependent}");
  }
  assert_eq!(result.steps_with_status(StepStatus::Completed), vec!["d", "e"]);
  assert_eq!(result.errors.len(), 1);
  assert_eq!(result.errors[0].kind, ErrorKind::StepExecution);
}

#[tokio::test]
async fn test_unknown_step_type_fails_without_attempts() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let orchestrator = WorkflowOrchestrator::with_notifier(fast_config(), Mocks::new().backends(), notifier);

  let result = orchestrator
    .submit(request(
      ExecutionMode::Sequential,
      vec![StepDef::new("mystery", StepType::custom("nope"))
        .with_retry(RetryPolicy::new(3, 1))],
    ))
    .await
    .unwrap();

  let step = result.step("mystery").unwrap();
  assert_eq!(step.status, StepStatus::Failed);
  assert_eq!(step.retry_count, 0);
  assert_eq!(step.error.as_ref().unwrap().kind, ErrorKind::UnknownStepType);
  assert_eq!(result.status, WorkflowStatus::Failed);

  let names: Vec<&str> = drain(&mut events).iter().map(ExecutionEvent::name).collect();
  assert_eq!(
    names,
    vec!["workflow:started", "step:failed", "workflow:failed"]
  );
}

#[tokio::test]
async fn test_disabled_and_conditional_steps_are_skipped() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  register_test_steps(&orchestrator);

  let result = orchestrator
    .submit(request(
      ExecutionMode::Sequential,
      vec![
        ok("off").disabled(),
        ok("after-off").depends_on(["off"]),
        ok("when-off-ran")
          .depends_on(["off"])
          .with_condition(Condition::Status {
            step: "off".into(),
            is: ExpectedStatus::Completed,
          }),
        ok("when-ok").depends_on(["after-off"]).with_condition(Condition::Equals {
          step: "after-off".into(),
          path: "ok".into(),
          value: json!(true),
        }),
      ],
    ))
    .await
    .unwrap();

  assert_eq!(result.status, WorkflowStatus::Completed);
  assert_eq!(
    result.step("off").unwrap().skip_reason,
    Some(SkipReason::Disabled)
  );
  assert_eq!(
    result.step("after-off").unwrap().status,
    StepStatus::Completed
  );
  assert_eq!(
    result.step("when-off-ran").unwrap().skip_reason,
    Some(SkipReason::ConditionNotMet)
  );
  assert_eq!(
    result.step("when-ok").unwrap().status,
    StepStatus::Completed
  );
  assert_eq!(result.metrics.skipped_steps, 2);
}

#[tokio::test]
async fn test_condition_on_sibling_is_rejected() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  let attempts = register_test_steps(&orchestrator);

  let err = orchestrator
    .submit(request(
      ExecutionMode::Parallel,
      vec![
        slow("sibling", 20),
        ok("gated").with_condition(Condition::Status {
          step: "sibling".into(),
          is: ExpectedStatus::Completed,
        }),
      ],
    ))
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Validation);
  assert!(err.to_string().contains("sibling"), "{}", err);
  assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_stops_dispatch() {
  let orchestrator = Arc::new(WorkflowOrchestrator::new(fast_config(), Mocks::new().backends()));
  register_test_steps(&orchestrator);

  let workflow_id = orchestrator
    .spawn(
      request(
        ExecutionMode::Sequential,
        vec![slow("long", 200), ok("next").depends_on(["long"]), ok("last")],
      )
      .with_workflow_id("cancel-me"),
    )
    .unwrap();
  assert_eq!(workflow_id, "cancel-me");

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(orchestrator.status("cancel-me"), Some(RunState::Running));
  assert!(orchestrator.cancel("cancel-me"));

  let result = orchestrator.wait("cancel-me").await.unwrap();

  assert_eq!(result.status, WorkflowStatus::Cancelled);
  assert_eq!(result.step("long").unwrap().status, StepStatus::Completed);
  for skipped in ["next", "last"] {
    assert_eq!(
      result.step(skipped).unwrap().skip_reason,
      Some(SkipReason::Cancelled),
      "{skipped}"
    );
  }
  assert_eq!(orchestrator.status("cancel-me"), Some(RunState::Cancelled));
  assert!(!orchestrator.cancel("cancel-me"));
}

#[tokio::test]
async fn test_cancel_during_last_stage_is_cancelled() {
  let mut config = fast_config();
  config.max_concurrency = 1;
  let orchestrator = Arc::new(WorkflowOrchestrator::new(config, Mocks::new().backends()));
  register_test_steps(&orchestrator);

  orchestrator
    .spawn(
      request(ExecutionMode::Parallel, vec![slow("a", 200), ok("b")])
        .with_workflow_id("last-stage"),
    )
    .unwrap();

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(orchestrator.cancel("last-stage"));
  let result = orchestrator.wait("last-stage").await.unwrap();

  assert_eq!(result.status, WorkflowStatus::Cancelled);
  assert_eq!(result.step("a").unwrap().status, StepStatus::Completed);
  let b = result.step("b").unwrap();
  assert_eq!(b.status, StepStatus::Skipped);
  assert_eq!(b.skip_reason, Some(SkipReason::Cancelled));
  assert_eq!(orchestrator.status("last-stage"), Some(RunState::Cancelled));
}

#[tokio::test]
async fn test_cancel_during_retry_delay_is_cancelled() {
  let orchestrator = Arc::new(WorkflowOrchestrator::new(fast_config(), Mocks::new().backends()));
  let attempts = register_test_steps(&orchestrator);

  orchestrator
    .spawn(
      request(
        ExecutionMode::Sequential,
        vec![
          fail("flaky").with_retry(RetryPolicy::new(3, 1_000)),
          ok("after").depends_on(["flaky"]),
        ],
      )
      .with_workflow_id("retrying"),
    )
    .unwrap();

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(
    orchestrator.step_status("retrying", "flaky"),
    Some(StepStatus::Retrying)
  );
  assert!(orchestrator.cancel("retrying"));
  let result = orchestrator.wait("retrying").await.unwrap();

  assert_eq!(result.status, WorkflowStatus::Cancelled);
  assert_eq!(result.step("flaky").unwrap().retry_count, 0);
  assert_eq!(attempts.load(Ordering::SeqCst), 1);
  assert_eq!(
    result.step("after").unwrap().skip_reason,
    Some(SkipReason::Cancelled)
  );
}

#[tokio::test]
async fn test_step_status_tracks_progress() {
  let orchestrator = Arc::new(WorkflowOrchestrator::new(fast_config(), Mocks::new().backends()));
  register_test_steps(&orchestrator);

  orchestrator
    .spawn(
      request(
        ExecutionMode::Sequential,
        vec![slow("first", 150), ok("second").depends_on(["first"])],
      )
      .with_workflow_id("progress"),
    )
    .unwrap();

  tokio::time::sleep(Duration::from_millis(40)).await;
  assert_eq!(
    orchestrator.step_status("progress", "first"),
    Some(StepStatus::Running)
  );
  assert_eq!(
    orchestrator.step_status("progress", "second"),
    Some(StepStatus::Pending)
  );
  assert_eq!(orchestrator.step_status("progress", "ghost"), None);

  orchestrator.wait("progress").await.unwrap();
  for step in ["first", "second"] {
    assert_eq!(
      orchestrator.step_status("progress", step),
      Some(StepStatus::Completed),
      "{step}"
    );
  }
}

#[tokio::test]
async fn test_running_workflow_id_cannot_be_reused() {
  let orchestrator = Arc::new(WorkflowOrchestrator::new(fast_config(), Mocks::new().backends()));
  register_test_steps(&orchestrator);
  let long = || {
    request(ExecutionMode::Sequential, vec![slow("long", 100)]).with_workflow_id("busy")
  };

  orchestrator.spawn(long()).unwrap();
  let err = orchestrator.spawn(long()).unwrap_err();
  assert!(matches!(err, EngineError::DuplicateWorkflow(ref id) if id == "busy"));

  orchestrator.wait("busy").await.unwrap();
  assert!(orchestrator.submit(long()).await.unwrap().is_completed());
}

#[tokio::test]
async fn test_wait_on_unknown_run() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  assert!(matches!(
    orchestrator.wait("nobody").await,
    Err(EngineError::NotFound(_))
  ));
}

#[tokio::test]
async fn test_hybrid_without_hints_follows_declared_order() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let orchestrator = WorkflowOrchestrator::with_notifier(fast_config(), Mocks::new().backends(), notifier);
  register_test_steps(&orchestrator);

  let result = orchestrator
    .submit(request(
      ExecutionMode::Hybrid,
      vec![ok("c").depends_on(["a"]), ok("a"), ok("b")],
    ))
    .await
    .unwrap();

  assert!(result.is_completed());
  assert_eq!(completion_order(&drain(&mut events)), vec!["a", "c", "b"]);
}

#[tokio::test]
async fn test_parallel_stage_outputs_are_visible_to_next_stage() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  register_test_steps(&orchestrator);
  orchestrator.register_step_fn(StepType::custom("join"), |step: StepDef, ctx: WorkflowContext| async move {
    let mut seen = Vec::new();
    for dependency in &step.dependencies {
      let output = ctx
        .step_output(dependency)
        .ok_or_else(|| StepError::execution(format!("{} has no output yet", dependency)))?;
      seen.push(output["step"].clone());
    }
    Ok::<Value, StepError>(json!({ "seen": seen }))
  });

  let result = orchestrator
    .submit(request(
      ExecutionMode::Parallel,
      vec![
        slow("left", 40),
        slow("right", 10),
        StepDef::new("join", StepType::custom("join")).depends_on(["left", "right"]),
      ],
    ))
    .await
    .unwrap();

  assert!(result.is_completed(), "{:?}", result.errors);
  assert_eq!(
    result.step("join").unwrap().output,
    Some(json!({ "seen": ["left", "right"] }))
  );
}

#[tokio::test]
async fn test_parallel_steps_overlap() {
  let orchestrator = WorkflowOrchestrator::new(fast_config(), Mocks::new().backends());
  register_test_steps(&orchestrator);

  let started = std::time::Instant::now();
  let result = orchestrator
    .submit(request(
      ExecutionMode::Parallel,
      vec![slow("a", 150), slow("b", 150), slow("c", 150)],
    ))
    .await
    .unwrap();

  assert!(result.is_completed());
  assert!(
    started.elapsed() < Duration::from_millis(400),
    "steps ran serially: {:?}",
    started.elapsed()
  );
}

#[tokio::test]
async fn test_event_sequence() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let orchestrator = WorkflowOrchestrator::with_notifier(fast_config(), Mocks::new().backends(), notifier);
  register_test_steps(&orchestrator);

  orchestrator
    .submit(
      request(
        ExecutionMode::Sequential,
        vec![ok("a"), ok("b").depends_on(["a"])],
      )
      .with_workflow_id("events"),
    )
    .await
    .unwrap();

  let events = drain(&mut events);
  let names: Vec<&str> = events.iter().map(ExecutionEvent::name).collect();
  assert_eq!(
    names,
    vec![
      "workflow:started",
      "step:started",
      "step:completed",
      "step:started",
      "step:completed",
      "workflow:completed",
    ]
  );
  assert!(events.iter().all(|e| e.workflow_id() == "events"));
  assert_eq!(events[1].step_id(), Some("a"));
  assert_eq!(events[3].step_id(), Some("b"));
}
