use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::enums::RetryBackoff;
use crate::step_type::StepType;

/// Retry settings for a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
  /// Retries after the first attempt. `0` means a single attempt.
  #[serde(default)]
  pub max_retries: u32,
  /// Base delay between attempts.
  #[serde(default)]
  pub delay_ms: u64,
  #[serde(default)]
  pub backoff: RetryBackoff,
  /// Upper bound for the computed delay.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_delay_ms: Option<u64>,
}

impl RetryPolicy {
  pub fn new(max_retries: u32, delay_ms: u64) -> Self {
    Self {
      max_retries,
      delay_ms,
      ..Self::default()
    }
  }

  pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
    self.backoff = backoff;
    self
  }

  /// Delay before retry number `retry` (0-indexed).
  pub fn delay_for_retry(&self, retry: u32) -> u64 {
    let delay = match self.backoff {
      RetryBackoff::Constant => self.delay_ms,
      RetryBackoff::Linear => self.delay_ms.saturating_mul(u64::from(retry) + 1),
      RetryBackoff::Exponential => {
        let factor = 1u64.checked_shl(retry.min(63)).unwrap_or(u64::MAX);
        self.delay_ms.saturating_mul(factor)
      }
    };

    match self.max_delay_ms {
      Some(max) => delay.min(max),
      None => delay,
    }
  }
}

/// A single step in a workflow request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
  pub step_id: String,
  pub step_type: StepType,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub configuration: serde_json::Value,
  #[serde(default)]
  pub retry: RetryPolicy,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
  /// Hybrid-mode hint: this step may share a concurrent stage with other
  /// hinted steps of the same phase.
  #[serde(default)]
  pub parallel: bool,
}

fn default_enabled() -> bool {
  true
}

impl StepDef {
  pub fn new(step_id: impl Into<String>, step_type: StepType) -> Self {
    Self {
      step_id: step_id.into(),
      step_type,
      enabled: true,
      dependencies: Vec::new(),
      configuration: serde_json::Value::Null,
      retry: RetryPolicy::default(),
      timeout_ms: None,
      condition: None,
      parallel: false,
    }
  }

  pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.dependencies = dependencies.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
    self.configuration = configuration;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn with_condition(mut self, condition: Condition) -> Self {
    self.condition = Some(condition);
    self
  }

  pub fn disabled(mut self) -> Self {
    self.enabled = false;
    self
  }

  pub fn parallel(mut self) -> Self {
    self.parallel = true;
    self
  }

  /// Look up a top-level configuration field.
  pub fn config(&self, key: &str) -> Option<&serde_json::Value> {
    self.configuration.get(key)
  }
}
