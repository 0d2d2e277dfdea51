//! Execution events and notifiers for observability.
//!
//! Events are emitted during workflow execution to allow consumers to observe
//! progress, persist state, stream to UIs, deliver webhooks, etc. They are
//! pure notifications: nothing a notifier does affects control flow.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::result::SkipReason;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted {
    workflow_id: String,
    total_steps: usize,
    at: DateTime<Utc>,
  },

  /// Every step is terminal and the run did not abort.
  WorkflowCompleted {
    workflow_id: String,
    at: DateTime<Utc>,
  },

  /// The run aborted on a step failure.
  WorkflowFailed {
    workflow_id: String,
    error: String,
    at: DateTime<Utc>,
  },

  WorkflowCancelled {
    workflow_id: String,
    at: DateTime<Utc>,
  },

  /// A step has started its first attempt.
  StepStarted {
    workflow_id: String,
    step_id: String,
    at: DateTime<Utc>,
  },

  /// An attempt failed and another one is scheduled after `delay_ms`.
  StepRetrying {
    workflow_id: String,
    step_id: String,
    attempt: u32,
    delay_ms: u64,
    error: String,
    at: DateTime<Utc>,
  },

  /// A step has completed successfully.
  StepCompleted {
    workflow_id: String,
    step_id: String,
    data: serde_json::Value,
    at: DateTime<Utc>,
  },

  /// A step has failed for good.
  StepFailed {
    workflow_id: String,
    step_id: String,
    error: String,
    at: DateTime<Utc>,
  },

  StepSkipped {
    workflow_id: String,
    step_id: String,
    reason: SkipReason,
    at: DateTime<Utc>,
  },
}

impl ExecutionEvent {
  /// Wire name, e.g. `workflow:started` or `step:retrying`.
  pub fn name(&self) -> &'static str {
    match self {
      ExecutionEvent::WorkflowStarted { .. } => "workflow:started",
      ExecutionEvent::WorkflowCompleted { .. } => "workflow:completed",
      ExecutionEvent::WorkflowFailed { .. } => "workflow:failed",
      ExecutionEvent::WorkflowCancelled { .. } => "workflow:cancelled",
      ExecutionEvent::StepStarted { .. } => "step:started",
      ExecutionEvent::StepRetrying { .. } => "step:retrying",
      ExecutionEvent::StepCompleted { .. } => "step:completed",
      ExecutionEvent::StepFailed { .. } => "step:failed",
      ExecutionEvent::StepSkipped { .. } => "step:skipped",
    }
  }

  pub fn workflow_id(&self) -> &str {
    match self {
      ExecutionEvent::WorkflowStarted { workflow_id, .. }
      | ExecutionEvent::WorkflowCompleted { workflow_id, .. }
      | ExecutionEvent::WorkflowFailed { workflow_id, .. }
      | ExecutionEvent::WorkflowCancelled { workflow_id, .. }
      | ExecutionEvent::StepStarted { workflow_id, .. }
      | ExecutionEvent::StepRetrying { workflow_id, .. }
      | ExecutionEvent::StepCompleted { workflow_id, .. }
      | ExecutionEvent::StepFailed { workflow_id, .. }
      | ExecutionEvent::StepSkipped { workflow_id, .. } => workflow_id,
    }
  }

  pub fn step_id(&self) -> Option<&str> {
    match self {
      ExecutionEvent::StepStarted { step_id, .. }
      | ExecutionEvent::StepRetrying { step_id, .. }
      | ExecutionEvent::StepCompleted { step_id, .. }
      | ExecutionEvent::StepFailed { step_id, .. }
      | ExecutionEvent::StepSkipped { step_id, .. } => Some(step_id),
      _ => None,
    }
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    match self {
      ExecutionEvent::WorkflowStarted { at, .. }
      | ExecutionEvent::WorkflowCompleted { at, .. }
      | ExecutionEvent::WorkflowFailed { at, .. }
      | ExecutionEvent::WorkflowCancelled { at, .. }
      | ExecutionEvent::StepStarted { at, .. }
      | ExecutionEvent::StepRetrying { at, .. }
      | ExecutionEvent::StepCompleted { at, .. }
      | ExecutionEvent::StepFailed { at, .. }
      | ExecutionEvent::StepSkipped { at, .. } => *at,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionEvent::WorkflowCompleted { .. }
        | ExecutionEvent::WorkflowFailed { .. }
        | ExecutionEvent::WorkflowCancelled { .. }
    )
  }
}

/// Trait for receiving execution events.
///
/// Implement this trait to receive events during workflow execution.
/// The engine calls `notify` for each event - implementations decide
/// what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

impl<T: ExecutionNotifier + ?Sized> ExecutionNotifier for Arc<T> {
  fn notify(&self, event: ExecutionEvent) {
    (**self).notify(event)
  }
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Event volume is a handful per step, so the channel is unbounded rather
/// than making the engine wait on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  /// Create a new channel notifier.
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with its receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Fans events out to any number of subscribers.
///
/// Subscribers that fall more than `capacity` events behind miss the oldest
/// ones (see [`broadcast::error::RecvError::Lagged`]).
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
  sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastNotifier {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity.max(1));
    Self { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
    self.sender.subscribe()
  }

  pub fn subscriber_count(&self) -> usize {
    self.sender.receiver_count()
  }
}

impl Default for BroadcastNotifier {
  fn default() -> Self {
    Self::new(1024)
  }
}

impl ExecutionNotifier for BroadcastNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // No subscribers is not an error
    let _ = self.sender.send(event);
  }
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// External delivery target for lifecycle events (webhook, callback, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
  async fn deliver(&self, event: &ExecutionEvent) -> Result<(), NotificationError>;
}

/// Drain a broadcast subscription into a [`NotificationSink`] until the bus
/// closes or `cancel` fires. Delivery failures are logged and skipped.
pub fn spawn_notification_forwarder(
  mut receiver: broadcast::Receiver<ExecutionEvent>,
  sink: Arc<dyn NotificationSink>,
  cancel: CancellationToken,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      let event = tokio::select! {
        _ = cancel.cancelled() => break,
        received = receiver.recv() => match received {
          Ok(event) => event,
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, "notification_forwarder_lagged");
            continue;
          }
          Err(broadcast::error::RecvError::Closed) => break,
        },
      };

      if let Err(e) = sink.deliver(&event).await {
        warn!(
          event = event.name(),
          workflow_id = %event.workflow_id(),
          error = %e,
          "notification_delivery_failed"
        );
      }
    }
    debug!("notification_forwarder_stopped");
  })
}
