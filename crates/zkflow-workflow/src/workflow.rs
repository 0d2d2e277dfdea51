use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use zkflow_config::{ExecutionMode, StepDef, WorkflowRequest};

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::scheduler::{DependencyScheduler, Phase};

/// A group of steps dispatched together. Steps in a concurrent stage run at
/// the same time; the next stage starts only once all of them are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
  pub steps: Vec<String>,
  pub concurrent: bool,
}

impl Stage {
  fn single(step_id: String) -> Self {
    Self {
      steps: vec![step_id],
      concurrent: false,
    }
  }
}

/// A validated workflow ready for execution.
#[derive(Debug, Clone)]
pub struct Workflow {
  steps: Vec<StepDef>,
  index: HashMap<String, usize>,
  mode: ExecutionMode,
  graph: Graph,
  phases: Vec<Phase>,
}

impl Workflow {
  /// Validate a request's step graph.
  ///
  /// Runs every structural check before anything executes: a non-empty
  /// step list, an execution mode, unique non-empty step IDs, known and
  /// non-reflexive dependencies, condition references limited to upstream
  /// steps, and no cycles.
  pub fn from_request(request: &WorkflowRequest) -> Result<Self, WorkflowError> {
    if request.steps.is_empty() {
      return Err(WorkflowError::NoSteps);
    }
    let mode = request
      .execution_mode
      .ok_or(WorkflowError::MissingExecutionMode)?;

    let mut index = HashMap::with_capacity(request.steps.len());
    for (position, step) in request.steps.iter().enumerate() {
      if step.step_id.trim().is_empty() {
        return Err(WorkflowError::EmptyStepId(position));
      }
      if index.insert(step.step_id.clone(), position).is_some() {
        return Err(WorkflowError::DuplicateStep(step.step_id.clone()));
      }
    }

    for step in &request.steps {
      for dependency in &step.dependencies {
        if dependency == &step.step_id {
          return Err(WorkflowError::SelfDependency(step.step_id.clone()));
        }
        if !index.contains_key(dependency) {
          return Err(WorkflowError::UnknownDependency {
            step: step.step_id.clone(),
            dependency: dependency.clone(),
          });
        }
      }
    }

    let graph = Graph::new(&request.steps);
    for step in &request.steps {
      let Some(condition) = &step.condition else {
        continue;
      };
      let referenced: HashSet<&str> = condition.referenced_steps().into_iter().collect();
      if let Some(unknown) = referenced.iter().find(|id| !index.contains_key(**id)) {
        return Err(WorkflowError::UnknownConditionStep {
          step: step.step_id.clone(),
          referenced: unknown.to_string(),
        });
      }

      // Only upstream steps are guaranteed terminal when the condition runs.
      let upstream = graph.dependencies_of(&step.step_id);
      if let Some(outside) = referenced
        .iter()
        .find(|id| !upstream.iter().any(|u| u == **id))
      {
        return Err(WorkflowError::ConditionNotUpstream {
          step: step.step_id.clone(),
          referenced: outside.to_string(),
        });
      }
    }

    let phases = DependencyScheduler::plan(&request.steps)?;

    Ok(Self {
      steps: request.steps.clone(),
      index,
      mode,
      graph,
      phases,
    })
  }

  pub fn mode(&self) -> ExecutionMode {
    self.mode
  }

  /// Steps in declared order.
  pub fn steps(&self) -> &[StepDef] {
    &self.steps
  }

  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&StepDef> {
    self.index.get(step_id).map(|&i| &self.steps[i])
  }

  pub fn phases(&self) -> &[Phase] {
    &self.phases
  }

  /// Transitive dependents of a step.
  pub fn dependents_of(&self, step_id: &str) -> Vec<String> {
    self.graph.dependents_of(step_id)
  }

  /// Topological order that respects declared order.
  pub fn sequential_order(&self) -> Vec<String> {
    // The graph was checked for cycles during validation.
    DependencyScheduler::sequential_order(&self.steps).unwrap_or_else(|_| {
      self
        .phases
        .iter()
        .flat_map(|p| p.steps.iter().cloned())
        .collect()
    })
  }

  /// Hybrid plan: within each phase, steps hinted `parallel` share one
  /// concurrent stage and the rest run one at a time after it.
  ///
  /// Without any hints this is exactly the sequential plan.
  pub fn hybrid_stages(&self) -> Vec<Stage> {
    if !self.steps.iter().any(|s| s.parallel) {
      return self.sequential_stages();
    }

    let mut stages = Vec::new();
    for phase in &self.phases {
      let (hinted, single): (Vec<&String>, Vec<&String>) = phase
        .steps
        .iter()
        .partition(|id| self.get_step(id).is_some_and(|s| s.parallel));

      if !hinted.is_empty() {
        stages.push(Stage {
          steps: hinted.into_iter().cloned().collect(),
          concurrent: true,
        });
      }
      stages.extend(single.into_iter().cloned().map(Stage::single));
    }
    stages
  }

  /// Execution stages for this workflow's mode.
  pub fn stages(&self) -> Vec<Stage> {
    match self.mode {
      ExecutionMode::Sequential => self.sequential_stages(),
      ExecutionMode::Parallel => self
        .phases
        .iter()
        .map(|phase| Stage {
          steps: phase.steps.clone(),
          concurrent: true,
        })
        .collect(),
      ExecutionMode::Hybrid => self.hybrid_stages(),
    }
  }

  fn sequential_stages(&self) -> Vec<Stage> {
    self
      .sequential_order()
      .into_iter()
      .map(Stage::single)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use zkflow_config::{Condition, StepType};

  fn pipeline() -> Vec<StepDef> {
    vec![
      StepDef::new("transform", StepType::Transform),
      StepDef::new("generate", StepType::Generate).depends_on(["transform"]),
      StepDef::new("verify", StepType::Verify).depends_on(["generate"]),
      StepDef::new("share", StepType::Share).depends_on(["verify"]),
    ]
  }

  #[test]
  fn test_valid_pipeline() {
    let request = WorkflowRequest::new(ExecutionMode::Sequential, pipeline());
    let workflow = Workflow::from_request(&request).unwrap();

    assert_eq!(workflow.phases().len(), 4);
    assert_eq!(workflow.get_step("verify").unwrap().step_type, StepType::Verify);
    assert_eq!(
      workflow.dependents_of("transform"),
      vec!["generate", "verify", "share"]
    );
  }

  #[test]
  fn test_rejects_empty_and_modeless_requests() {
    let empty = WorkflowRequest::new(ExecutionMode::Parallel, vec![]);
    assert_eq!(Workflow::from_request(&empty).unwrap_err(), WorkflowError::NoSteps);

    let mut modeless = WorkflowRequest::new(ExecutionMode::Parallel, pipeline());
    modeless.execution_mode = None;
    assert_eq!(
      Workflow::from_request(&modeless).unwrap_err(),
      WorkflowError::MissingExecutionMode
    );
  }

  #[test]
  fn test_rejects_bad_step_ids() {
    let mut steps = pipeline();
    steps.push(StepDef::new("generate", StepType::Generate));
    let request = WorkflowRequest::new(ExecutionMode::Sequential, steps);
    assert_eq!(
      Workflow::from_request(&request).unwrap_err(),
      WorkflowError::DuplicateStep("generate".into())
    );

    let request = WorkflowRequest::new(
      ExecutionMode::Sequential,
      vec![StepDef::new(" ", StepType::Transform)],
    );
    assert_eq!(
      Workflow::from_request(&request).unwrap_err(),
      WorkflowError::EmptyStepId(0)
    );
  }

  #[test]
  fn test_rejects_bad_dependencies() {
    let request = WorkflowRequest::new(
      ExecutionMode::Sequential,
      vec![StepDef::new("a", StepType::Transform).depends_on(["a"])],
    );
    assert_eq!(
      Workflow::from_request(&request).unwrap_err(),
      WorkflowError::SelfDependency("a".into())
    );

    let request = WorkflowRequest::new(
      ExecutionMode::Sequential,
      vec![StepDef::new("a", StepType::Transform).depends_on(["ghost"])],
    );
    assert_eq!(
      Workflow::from_request(&request).unwrap_err(),
      WorkflowError::UnknownDependency {
        step: "a".into(),
        dependency: "ghost".into(),
      }
    );
  }

  #[test]
  fn test_rejects_unknown_condition_reference() {
    let condition = Condition::Equals {
      step: "ghost".into(),
      path: "valid".into(),
      value: json!(true),
    };
    let request = WorkflowRequest::new(
      ExecutionMode::Sequential,
      vec![StepDef::new("a", StepType::Share).with_condition(condition)],
    );
    assert!(matches!(
      Workflow::from_request(&request).unwrap_err(),
      WorkflowError::UnknownConditionStep { .. }
    ));
  }

  #[test]
  fn test_condition_must_reference_upstream_step() {
    let on_sibling = Condition::Status {
      step: "b".into(),
      is: zkflow_config::ExpectedStatus::Completed,
    };
    let request = WorkflowRequest::new(
      ExecutionMode::Parallel,
      vec![
        StepDef::new("a", StepType::Transform),
        StepDef::new("b", StepType::Transform),
        StepDef::new("c", StepType::Share)
          .depends_on(["a"])
          .with_condition(on_sibling.clone()),
      ],
    );
    assert_eq!(
      Workflow::from_request(&request).unwrap_err(),
      WorkflowError::ConditionNotUpstream {
        step: "c".into(),
        referenced: "b".into(),
      }
    );

    // Transitive dependencies are fine.
    let request = WorkflowRequest::new(
      ExecutionMode::Parallel,
      vec![
        StepDef::new("b", StepType::Transform),
        StepDef::new("a", StepType::Transform).depends_on(["b"]),
        StepDef::new("c", StepType::Share)
          .depends_on(["a"])
          .with_condition(on_sibling),
      ],
    );
    assert!(Workflow::from_request(&request).is_ok());
  }

  #[test]
  fn test_cycle_is_rejected() {
    let request = WorkflowRequest::new(
      ExecutionMode::Parallel,
      vec![
        StepDef::new("A", StepType::Transform).depends_on(["C"]),
        StepDef::new("B", StepType::Generate).depends_on(["A"]),
        StepDef::new("C", StepType::Verify).depends_on(["B"]),
      ],
    );
    let err = Workflow::from_request(&request).unwrap_err();
    assert!(err.is_cycle());
    assert_eq!(err.to_string(), "circular dependency between steps: A, B, C");
  }

  #[test]
  fn test_parallel_stages_follow_phases() {
    let request = WorkflowRequest::new(
      ExecutionMode::Parallel,
      vec![
        StepDef::new("a", StepType::Transform),
        StepDef::new("b", StepType::Transform),
        StepDef::new("c", StepType::Generate).depends_on(["a", "b"]),
      ],
    );
    let stages = Workflow::from_request(&request).unwrap().stages();

    assert_eq!(stages.len(), 2);
    assert!(stages.iter().all(|s| s.concurrent));
    assert_eq!(stages[0].steps, vec!["a", "b"]);
  }

  #[test]
  fn test_hybrid_without_hints_is_sequential() {
    let steps = vec![
      StepDef::new("a", StepType::Transform),
      StepDef::new("b", StepType::Generate).depends_on(["a"]),
      StepDef::new("c", StepType::Transform),
    ];
    let hybrid = Workflow::from_request(&WorkflowRequest::new(ExecutionMode::Hybrid, steps.clone()))
      .unwrap()
      .stages();
    let sequential =
      Workflow::from_request(&WorkflowRequest::new(ExecutionMode::Sequential, steps))
        .unwrap()
        .stages();

    assert_eq!(hybrid, sequential);
    assert!(hybrid.iter().all(|s| !s.concurrent && s.steps.len() == 1));
  }

  #[test]
  fn test_hybrid_groups_hinted_steps() {
    let request = WorkflowRequest::new(
      ExecutionMode::Hybrid,
      vec![
        StepDef::new("a", StepType::Transform).parallel(),
        StepDef::new("b", StepType::Transform),
        StepDef::new("c", StepType::Transform).parallel(),
        StepDef::new("d", StepType::Generate).depends_on(["a", "b", "c"]),
      ],
    );
    let stages = Workflow::from_request(&request).unwrap().stages();

    assert_eq!(
      stages,
      vec![
        Stage {
          steps: vec!["a".into(), "c".into()],
          concurrent: true,
        },
        Stage::single("b".into()),
        Stage::single("d".into()),
      ]
    );
  }
}
