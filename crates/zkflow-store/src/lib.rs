//! zkflow Store
//!
//! This crate provides the persistence trait and implementations for
//! workflow run snapshots. The orchestrator saves a [`RunSnapshot`] at every
//! stage boundary and once more when the run finishes, so an interrupted
//! run can be inspected after a crash.
//!
//! The [`WorkflowPersistence`] trait defines operations for:
//! - Saving (upserting) a run snapshot
//! - Loading a run by workflow ID
//! - Listing recent runs

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use sqlx::types::Json;
pub use types::{RunSnapshot, RunStatus};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for workflow run snapshots.
#[async_trait]
pub trait WorkflowPersistence: Send + Sync {
  /// Insert or replace the snapshot for `snapshot.workflow_id`.
  async fn save(&self, snapshot: &RunSnapshot) -> Result<(), Error>;

  /// Get a run snapshot by workflow ID.
  async fn load(&self, workflow_id: &str) -> Result<RunSnapshot, Error>;

  /// List stored runs, most recently updated first.
  async fn list(&self) -> Result<Vec<RunSnapshot>, Error>;

  /// Delete a run snapshot. Returns whether it existed.
  async fn delete(&self, workflow_id: &str) -> Result<bool, Error>;
}
