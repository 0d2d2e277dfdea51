use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of work a step performs.
///
/// Serialized as a plain string: `"transform"`, `"generate"`, `"verify"`,
/// `"share"`, `"custom"` or `"custom:<name>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StepType {
  Transform,
  Generate,
  Verify,
  Share,
  /// A caller-registered step kind. The name is empty for a bare `"custom"`.
  Custom(String),
}

impl StepType {
  /// Shorthand for `StepType::Custom(name.into())`.
  pub fn custom(name: impl Into<String>) -> Self {
    Self::Custom(name.into())
  }

  /// Key used to look up this step type's slice of the workflow input.
  pub fn input_key(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for StepType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StepType::Transform => f.write_str("transform"),
      StepType::Generate => f.write_str("generate"),
      StepType::Verify => f.write_str("verify"),
      StepType::Share => f.write_str("share"),
      StepType::Custom(name) if name.is_empty() => f.write_str("custom"),
      StepType::Custom(name) => write!(f, "custom:{}", name),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown step type '{0}' (expected transform, generate, verify, share or custom[:name])")]
pub struct StepTypeParseError(pub String);

impl FromStr for StepType {
  type Err = StepTypeParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "transform" => Ok(StepType::Transform),
      "generate" => Ok(StepType::Generate),
      "verify" => Ok(StepType::Verify),
      "share" => Ok(StepType::Share),
      "custom" => Ok(StepType::Custom(String::new())),
      other => match other.strip_prefix("custom:") {
        Some(name) if !name.is_empty() => Ok(StepType::Custom(name.to_string())),
        _ => Err(StepTypeParseError(other.to_string())),
      },
    }
  }
}

impl TryFrom<String> for StepType {
  type Error = StepTypeParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<StepType> for String {
  fn from(value: StepType) -> Self {
    value.to_string()
  }
}
