use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a persisted workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
    )
  }
}

/// A workflow run as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RunSnapshot {
  pub workflow_id: String,
  pub status: RunStatus,
  pub stages_completed: i64,
  pub total_stages: i64,
  pub started_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Step ID -> step result, as recorded so far.
  pub step_results: Json<serde_json::Value>,
  pub shared_data: Json<serde_json::Value>,
}
