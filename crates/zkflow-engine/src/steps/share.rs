use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use zkflow_backend::{ProofBundle, ShareBackend, ShareRequest};
use zkflow_config::StepDef;

use super::{parameter, required};
use crate::context::WorkflowContext;
use crate::error::StepError;
use crate::executor::{StepExecutor, StepOutput};

/// Hands the proof bundle to a recipient, revealing only the public signals
/// listed in `disclose`.
pub struct ShareStep {
  sharer: Arc<dyn ShareBackend>,
}

impl ShareStep {
  pub fn new(sharer: Arc<dyn ShareBackend>) -> Self {
    Self { sharer }
  }
}

#[async_trait]
impl StepExecutor for ShareStep {
  async fn execute(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<StepOutput, StepError> {
    let request = ShareRequest {
      bundle: required::<ProofBundle>(step, ctx, "proofBundle")?,
      disclose: parameter(step, ctx, "disclose")?.unwrap_or_default(),
      recipient: required(step, ctx, "recipient")?,
      encryption: parameter(step, ctx, "encryption")?.unwrap_or(Value::Null),
    };

    let receipt = self.sharer.share(&request).await?;
    info!(
      workflow_id = %ctx.workflow_id(),
      step_id = %step.step_id,
      share_id = %receipt.share_id,
      recipient = %receipt.recipient,
      "proof_shared"
    );

    let output = serde_json::to_value(&receipt)
      .map_err(|e| StepError::execution(format!("failed to encode share receipt: {}", e)))?;
    ctx.set_shared("shareReceipt", output.clone());
    Ok(StepOutput::new(output))
  }
}
