//! Step conditions.
//!
//! A condition is a small closed predicate language over the results of
//! earlier steps. It is data, never code: conditions are parsed from JSON
//! into this AST and evaluated against a [`ConditionScope`].
//!
//! ```json
//! { "op": "all", "conditions": [
//!   { "op": "status", "step": "verify", "is": "completed" },
//!   { "op": "equals", "step": "verify", "path": "valid", "value": true }
//! ]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status a condition can test for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedStatus {
  Completed,
  Failed,
  Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
  /// The value at `path` in `step`'s output equals `value`.
  Equals {
    step: String,
    #[serde(default)]
    path: String,
    value: Value,
  },
  /// Negation of `Equals`; true when the path is absent.
  NotEquals {
    step: String,
    #[serde(default)]
    path: String,
    value: Value,
  },
  /// `step` produced output with a non-null value at `path`.
  Exists {
    step: String,
    #[serde(default)]
    path: String,
  },
  /// `step` reached the given terminal status.
  Status { step: String, is: ExpectedStatus },
  All { conditions: Vec<Condition> },
  Any { conditions: Vec<Condition> },
  Not { condition: Box<Condition> },
}

/// Read access to prior step results for condition evaluation.
pub trait ConditionScope {
  /// Terminal status of a step, if it has one.
  fn step_status(&self, step_id: &str) -> Option<ExpectedStatus>;

  /// Output of a step, if it produced one.
  fn step_output(&self, step_id: &str) -> Option<Value>;
}

impl Condition {
  pub fn evaluate(&self, scope: &dyn ConditionScope) -> bool {
    match self {
      Condition::Equals { step, path, value } => {
        lookup(scope, step, path).is_some_and(|found| &found == value)
      }
      Condition::NotEquals { step, path, value } => {
        lookup(scope, step, path).is_none_or(|found| &found != value)
      }
      Condition::Exists { step, path } => {
        lookup(scope, step, path).is_some_and(|found| !found.is_null())
      }
      Condition::Status { step, is } => scope.step_status(step) == Some(*is),
      Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(scope)),
      Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(scope)),
      Condition::Not { condition } => !condition.evaluate(scope),
    }
  }

  /// Every step ID referenced anywhere in this condition.
  pub fn referenced_steps(&self) -> Vec<&str> {
    let mut steps = Vec::new();
    self.collect_steps(&mut steps);
    steps
  }

  fn collect_steps<'a>(&'a self, out: &mut Vec<&'a str>) {
    match self {
      Condition::Equals { step, .. }
      | Condition::NotEquals { step, .. }
      | Condition::Exists { step, .. }
      | Condition::Status { step, .. } => out.push(step),
      Condition::All { conditions } | Condition::Any { conditions } => {
        for condition in conditions {
          condition.collect_steps(out);
        }
      }
      Condition::Not { condition } => condition.collect_steps(out),
    }
  }
}

/// Resolve a dot-separated path (`proof.pi_a.0`) inside a step's output.
fn lookup(scope: &dyn ConditionScope, step: &str, path: &str) -> Option<Value> {
  let output = scope.step_output(step)?;
  if path.is_empty() {
    return Some(output);
  }

  let mut current = &output;
  for segment in path.split('.') {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current.clone())
}
