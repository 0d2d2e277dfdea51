use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use zkflow_config::StepDef;

use crate::error::WorkflowError;

/// A set of steps whose dependencies are all satisfied by earlier phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
  pub index: usize,
  /// Step IDs in declared order.
  pub steps: Vec<String>,
}

/// Groups a step graph into ordered phases.
///
/// Pure graph computation; never blocks and never touches step state.
pub struct DependencyScheduler;

impl DependencyScheduler {
  /// Kahn's algorithm over the declared dependencies.
  ///
  /// Each round collects every unscheduled step whose dependencies are all
  /// scheduled. A round that makes no progress means the remaining steps sit
  /// on or behind a cycle; they are all named in the error.
  ///
  /// Unknown dependency IDs never resolve, so callers validate references
  /// first (see [`crate::Workflow::from_request`]).
  pub fn plan(steps: &[StepDef]) -> Result<Vec<Phase>, WorkflowError> {
    let mut scheduled: HashSet<&str> = HashSet::with_capacity(steps.len());
    let mut remaining: Vec<&StepDef> = steps.iter().collect();
    let mut phases = Vec::new();

    while !remaining.is_empty() {
      let (ready, blocked): (Vec<&StepDef>, Vec<&StepDef>) =
        remaining.into_iter().partition(|step| {
          step
            .dependencies
            .iter()
            .all(|dep| scheduled.contains(dep.as_str()))
        });

      if ready.is_empty() {
        let mut steps: Vec<String> = blocked.iter().map(|s| s.step_id.clone()).collect();
        steps.sort();
        return Err(WorkflowError::CircularDependency { steps });
      }

      scheduled.extend(ready.iter().map(|s| s.step_id.as_str()));
      phases.push(Phase {
        index: phases.len(),
        steps: ready.iter().map(|s| s.step_id.clone()).collect(),
      });
      remaining = blocked;
    }

    Ok(phases)
  }

  /// A single topological order that respects declared order: at every
  /// point, the earliest-declared step whose dependencies have all been
  /// placed comes next.
  pub fn sequential_order(steps: &[StepDef]) -> Result<Vec<String>, WorkflowError> {
    let mut placed: HashSet<&str> = HashSet::with_capacity(steps.len());
    let mut order = Vec::with_capacity(steps.len());
    let mut remaining: Vec<&StepDef> = steps.iter().collect();

    while !remaining.is_empty() {
      let next = remaining.iter().position(|step| {
        step
          .dependencies
          .iter()
          .all(|dep| placed.contains(dep.as_str()))
      });

      let Some(position) = next else {
        let mut steps: Vec<String> = remaining.iter().map(|s| s.step_id.clone()).collect();
        steps.sort();
        return Err(WorkflowError::CircularDependency { steps });
      };

      let step = remaining.remove(position);
      placed.insert(step.step_id.as_str());
      order.push(step.step_id.clone());
    }

    Ok(order)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use zkflow_config::StepType;

  fn step(id: &str, deps: &[&str]) -> StepDef {
    StepDef::new(id, StepType::custom("noop")).depends_on(deps.iter().copied())
  }

  fn phase_steps(phases: &[Phase]) -> Vec<Vec<&str>> {
    phases
      .iter()
      .map(|p| p.steps.iter().map(String::as_str).collect())
      .collect()
  }

  #[test]
  fn test_linear_chain() {
    let phases = DependencyScheduler::plan(&[
      step("transform", &[]),
      step("generate", &["transform"]),
      step("verify", &["generate"]),
    ])
    .unwrap();

    assert_eq!(
      phase_steps(&phases),
      vec![vec!["transform"], vec!["generate"], vec!["verify"]]
    );
    assert_eq!(phases[2].index, 2);
  }

  #[test]
  fn test_diamond_groups_independent_steps() {
    let phases = DependencyScheduler::plan(&[
      step("a", &[]),
      step("c", &["a"]),
      step("b", &["a"]),
      step("d", &["b", "c"]),
    ])
    .unwrap();

    assert_eq!(
      phase_steps(&phases),
      vec![vec!["a"], vec!["c", "b"], vec!["d"]]
    );
  }

  #[test]
  fn test_cycle_names_every_unresolved_step() {
    let err = DependencyScheduler::plan(&[
      step("start", &[]),
      step("A", &["C"]),
      step("B", &["A"]),
      step("C", &["B"]),
    ])
    .unwrap_err();

    assert_eq!(
      err,
      WorkflowError::CircularDependency {
        steps: vec!["A".into(), "B".into(), "C".into()],
      }
    );
  }

  #[test]
  fn test_sequential_order_respects_dependencies() {
    let order = DependencyScheduler::sequential_order(&[
      step("verify", &["generate"]),
      step("transform", &[]),
      step("generate", &["transform"]),
      step("share", &[]),
    ])
    .unwrap();

    assert_eq!(order, vec!["transform", "generate", "verify", "share"]);
  }

  #[test]
  fn test_sequential_order_keeps_declared_order() {
    let order =
      DependencyScheduler::sequential_order(&[step("a", &[]), step("b", &["a"]), step("c", &[])])
        .unwrap();

    assert_eq!(order, vec!["a", "b", "c"]);
  }
}
