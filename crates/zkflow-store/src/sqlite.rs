use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::{Error, RunSnapshot, WorkflowPersistence};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a database file and run migrations.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }
}

#[async_trait]
impl WorkflowPersistence for SqliteStore {
  async fn save(&self, snapshot: &RunSnapshot) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO workflow_runs (workflow_id, status, stages_completed, total_stages, started_at, updated_at, step_results, shared_data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (workflow_id) DO UPDATE SET
                status = excluded.status,
                stages_completed = excluded.stages_completed,
                total_stages = excluded.total_stages,
                updated_at = excluded.updated_at,
                step_results = excluded.step_results,
                shared_data = excluded.shared_data
            "#,
    )
    .bind(&snapshot.workflow_id)
    .bind(snapshot.status)
    .bind(snapshot.stages_completed)
    .bind(snapshot.total_stages)
    .bind(snapshot.started_at)
    .bind(snapshot.updated_at)
    .bind(&snapshot.step_results)
    .bind(&snapshot.shared_data)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load(&self, workflow_id: &str) -> Result<RunSnapshot, Error> {
    sqlx::query_as(
      r#"
            SELECT workflow_id, status, stages_completed, total_stages, started_at, updated_at, step_results, shared_data
            FROM workflow_runs
            WHERE workflow_id = ?
            "#,
    )
    .bind(workflow_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(workflow_id.to_string()))
  }

  async fn list(&self) -> Result<Vec<RunSnapshot>, Error> {
    let snapshots = sqlx::query_as(
      r#"
            SELECT workflow_id, status, stages_completed, total_stages, started_at, updated_at, step_results, shared_data
            FROM workflow_runs
            ORDER BY updated_at DESC
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(snapshots)
  }

  async fn delete(&self, workflow_id: &str) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM workflow_runs WHERE workflow_id = ?")
      .bind(workflow_id)
      .execute(&self.pool)
      .await?;

    Ok(result.rows_affected() > 0)
  }
}
