use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::{Error, RunSnapshot, WorkflowPersistence};

/// In-process store. Snapshots are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
  runs: RwLock<HashMap<String, RunSnapshot>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl WorkflowPersistence for MemoryStore {
  async fn save(&self, snapshot: &RunSnapshot) -> Result<(), Error> {
    let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
    runs.insert(snapshot.workflow_id.clone(), snapshot.clone());
    Ok(())
  }

  async fn load(&self, workflow_id: &str) -> Result<RunSnapshot, Error> {
    let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
    runs
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(workflow_id.to_string()))
  }

  async fn list(&self) -> Result<Vec<RunSnapshot>, Error> {
    let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
    let mut snapshots: Vec<RunSnapshot> = runs.values().cloned().collect();
    snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(snapshots)
  }

  async fn delete(&self, workflow_id: &str) -> Result<bool, Error> {
    let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
    Ok(runs.remove(workflow_id).is_some())
  }
}
