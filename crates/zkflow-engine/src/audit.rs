//! Audit trail.
//!
//! Every run keeps an [`AuditTrail`] fed from its lifecycle events. The level
//! requested by the workflow decides what is kept:
//!
//! - `none`: nothing
//! - `basic`: run start/end and each step's terminal event, without outputs
//! - `detailed`: every event, including step outputs and retries

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zkflow_config::AuditLevel;

use crate::events::{ExecutionEvent, ExecutionNotifier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
  pub timestamp: DateTime<Utc>,
  pub workflow_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_id: Option<String>,
  /// Event name, e.g. `step:completed`.
  pub action: String,
  pub details: Value,
}

#[derive(Debug, thiserror::Error)]
#[error("audit sink error: {0}")]
pub struct AuditError(pub String);

/// External destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
  async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Keeps entries in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
  entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> Vec<AuditEntry> {
    self
      .entries
      .lock()
      .map(|e| e.clone())
      .unwrap_or_default()
  }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
  async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
    self
      .entries
      .lock()
      .map_err(|e| AuditError(format!("audit log lock poisoned: {}", e)))?
      .push(entry.clone());
    Ok(())
  }
}

/// Per-run audit log, filtered by level.
pub struct AuditTrail {
  level: AuditLevel,
  entries: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
  pub fn new(level: AuditLevel) -> Self {
    Self {
      level,
      entries: Mutex::new(Vec::new()),
    }
  }

  pub fn level(&self) -> AuditLevel {
    self.level
  }

  pub fn record(&self, event: &ExecutionEvent) {
    let detailed = match self.level {
      AuditLevel::None => return,
      AuditLevel::Basic => false,
      AuditLevel::Detailed => true,
    };

    if !detailed
      && matches!(
        event,
        ExecutionEvent::StepStarted { .. } | ExecutionEvent::StepRetrying { .. }
      )
    {
      return;
    }

    let mut details = serde_json::to_value(event).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut details {
      map.remove("type");
      map.remove("at");
      map.remove("workflow_id");
      map.remove("step_id");
      if !detailed {
        map.remove("data");
      }
    }

    let entry = AuditEntry {
      timestamp: event.timestamp(),
      workflow_id: event.workflow_id().to_string(),
      step_id: event.step_id().map(str::to_string),
      action: event.name().to_string(),
      details,
    };

    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.push(entry);
  }

  pub fn entries(&self) -> Vec<AuditEntry> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.clone()
  }
}

impl ExecutionNotifier for AuditTrail {
  fn notify(&self, event: ExecutionEvent) {
    self.record(&event);
  }
}
