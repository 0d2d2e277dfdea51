use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use zkflow_backend::CredentialTransformer;
use zkflow_config::{StepDef, StepType};

use super::{lookup, parameter};
use crate::context::WorkflowContext;
use crate::error::StepError;
use crate::executor::{StepExecutor, StepOutput};

/// Converts raw credentials into circuit inputs.
///
/// Reads `credentials` and `circuitId`; the circuit may also come from the
/// generate input. Publishes `zkInputs` and `circuitId`.
pub struct TransformStep {
  transformer: Arc<dyn CredentialTransformer>,
}

impl TransformStep {
  pub fn new(transformer: Arc<dyn CredentialTransformer>) -> Self {
    Self { transformer }
  }
}

#[async_trait]
impl StepExecutor for TransformStep {
  async fn execute(&self, step: &StepDef, ctx: &WorkflowContext) -> Result<StepOutput, StepError> {
    let credentials = lookup(step, ctx, "credentials")
      .ok_or_else(|| StepError::MissingInput("credentials".into()))?;

    let circuit_id: String = match parameter(step, ctx, "circuitId")? {
      Some(circuit_id) => circuit_id,
      None => ctx
        .input_field(&StepType::Generate, "circuitId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StepError::MissingInput("circuitId".into()))?,
    };

    let inputs = self.transformer.convert(&credentials, &circuit_id).await?;
    debug!(
      workflow_id = %ctx.workflow_id(),
      step_id = %step.step_id,
      circuit_id = %circuit_id,
      "credentials_transformed"
    );

    ctx.set_shared("zkInputs", inputs.clone());
    ctx.set_shared("circuitId", Value::String(circuit_id.clone()));

    Ok(StepOutput::new(json!({
      "circuitId": circuit_id,
      "zkInputs": inputs,
    })))
  }
}
