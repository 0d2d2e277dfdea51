use async_trait::async_trait;
use serde_json::Value;

use crate::error::BackendError;
use crate::types::{ProofBundle, ShareReceipt, ShareRequest};

/// Turns raw credentials into circuit inputs.
#[async_trait]
pub trait CredentialTransformer: Send + Sync {
  async fn convert(&self, credentials: &Value, circuit_id: &str) -> Result<Value, BackendError>;
}

/// Produces proofs for a circuit.
#[async_trait]
pub trait ProvingBackend: Send + Sync {
  async fn prove(
    &self,
    circuit_id: &str,
    inputs: &Value,
    algorithm: &str,
  ) -> Result<ProofBundle, BackendError>;
}

/// Checks proofs. `Ok(false)` means the proof is well-formed but invalid.
#[async_trait]
pub trait VerificationBackend: Send + Sync {
  async fn verify(&self, bundle: &ProofBundle, verification_key: &Value)
  -> Result<bool, BackendError>;
}

/// Delivers proofs to a recipient.
#[async_trait]
pub trait ShareBackend: Send + Sync {
  async fn share(&self, request: &ShareRequest) -> Result<ShareReceipt, BackendError>;
}
