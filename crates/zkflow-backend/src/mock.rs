//! Deterministic mock backends.
//!
//! Proofs are SHA-256 digests: `pi_a[0]` seals the circuit and the public
//! signals, so the mock verifier accepts exactly the bundles the mock prover
//! produced and rejects any tampered signal or proof.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use zkflow_digest::{Digest, DigestBuilder, canonical_string};

use crate::error::BackendError;
use crate::traits::{CredentialTransformer, ProvingBackend, ShareBackend, VerificationBackend};
use crate::types::{ProofBundle, ShareReceipt, ShareRequest};

const MOCK_SECURITY_LEVEL: u32 = 128;

fn seal(circuit_id: &str, public_signals: &[String]) -> String {
  DigestBuilder::new()
    .text("zkflow/mock-seal")
    .text(circuit_id)
    .value(&json!(public_signals))
    .finish()
    .to_string()
}

fn signal_of(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Bool(true) => "1".to_string(),
    Value::Bool(false) => "0".to_string(),
    other => canonical_string(other),
  }
}

/// Stringifies every credential field into a circuit input.
#[derive(Default)]
pub struct MockTransformer;

#[async_trait]
impl CredentialTransformer for MockTransformer {
  async fn convert(&self, credentials: &Value, circuit_id: &str) -> Result<Value, BackendError> {
    let Value::Object(fields) = credentials else {
      return Err(BackendError::InvalidInput(
        "credentials must be a JSON object".into(),
      ));
    };

    let mut inputs = serde_json::Map::new();
    for (name, value) in fields {
      inputs.insert(name.clone(), Value::String(signal_of(value)));
    }
    inputs.insert("circuitId".into(), Value::String(circuit_id.to_string()));
    Ok(Value::Object(inputs))
  }
}

/// Digest-based prover. Counts calls and can be told to fail a number of
/// times before succeeding.
#[derive(Default)]
pub struct MockProver {
  calls: AtomicUsize,
  failures_left: AtomicU32,
}

impl MockProver {
  pub fn new() -> Self {
    Self::default()
  }

  /// Report [`BackendError::Unavailable`] for the next `times` calls.
  pub fn failing(times: u32) -> Self {
    Self {
      calls: AtomicUsize::new(0),
      failures_left: AtomicU32::new(times),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ProvingBackend for MockProver {
  async fn prove(
    &self,
    circuit_id: &str,
    inputs: &Value,
    algorithm: &str,
  ) -> Result<ProofBundle, BackendError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let should_fail = self
      .failures_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if should_fail {
      return Err(BackendError::Unavailable("mock prover busy".into()));
    }

    if !inputs.is_object() {
      return Err(BackendError::InvalidInput(
        "circuit inputs must be a JSON object".into(),
      ));
    }
    if circuit_id.is_empty() {
      return Err(BackendError::InvalidInput("circuit id is empty".into()));
    }

    let commitment = Digest::of_value(inputs);
    let public_signals = vec!["1".to_string(), commitment.as_str()[..16].to_string()];
    let sealed = seal(circuit_id, &public_signals);
    let witness = DigestBuilder::new()
      .text(circuit_id)
      .digest(&commitment)
      .finish()
      .to_string();

    Ok(ProofBundle {
      proof: json!({
        "pi_a": [sealed, witness, "1"],
        "pi_b": [[commitment.as_str(), witness], ["1", "0"]],
        "pi_c": [witness, "1"],
        "protocol": algorithm,
        "curve": "bn128",
      }),
      public_signals,
      circuit_id: circuit_id.to_string(),
      algorithm: algorithm.to_string(),
      generated_at: Utc::now(),
      security_level: Some(MOCK_SECURITY_LEVEL),
    })
  }
}

/// Accepts exactly the bundles [`MockProver`] produces.
#[derive(Default)]
pub struct MockVerifier {
  calls: AtomicUsize,
}

impl MockVerifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl VerificationBackend for MockVerifier {
  async fn verify(
    &self,
    bundle: &ProofBundle,
    _verification_key: &Value,
  ) -> Result<bool, BackendError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let Some(first) = bundle.proof.pointer("/pi_a/0").and_then(Value::as_str) else {
      return Err(BackendError::InvalidInput("proof is missing pi_a".into()));
    };
    Ok(first == seal(&bundle.circuit_id, &bundle.public_signals))
  }
}

/// Records every share it is asked to make.
#[derive(Default)]
pub struct MockSharer {
  shared: Mutex<Vec<ShareReceipt>>,
}

impl MockSharer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn receipts(&self) -> Vec<ShareReceipt> {
    self
      .shared
      .lock()
      .map(|s| s.clone())
      .unwrap_or_default()
  }
}

#[async_trait]
impl ShareBackend for MockSharer {
  async fn share(&self, request: &ShareRequest) -> Result<ShareReceipt, BackendError> {
    if request.recipient.trim().is_empty() {
      return Err(BackendError::InvalidInput("recipient is required".into()));
    }

    let share_id = DigestBuilder::new()
      .text(&request.recipient)
      .text(&request.bundle.circuit_id)
      .value(&request.bundle.proof)
      .finish();

    let receipt = ShareReceipt {
      share_id: share_id.to_string(),
      recipient: request.recipient.clone(),
      circuit_id: request.bundle.circuit_id.clone(),
      disclosed_signals: request.disclosed_signals(),
      shared_at: Utc::now(),
    };

    self
      .shared
      .lock()
      .map_err(|e| BackendError::Failed(format!("share log lock poisoned: {}", e)))?
      .push(receipt.clone());
    Ok(receipt)
  }
}
