use std::collections::{HashMap, HashSet, VecDeque};

use zkflow_config::StepDef;

/// Dependency edges in both directions, used for validation and failure
/// propagation.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: step_id -> list of dependent step_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step_id -> list of dependency step_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from step definitions. Duplicate dependency entries are
  /// collapsed.
  pub fn new(steps: &[StepDef]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    // Initialize all steps
    for step in steps {
      adjacency.entry(step.step_id.clone()).or_default();
      reverse_adjacency.entry(step.step_id.clone()).or_default();
    }

    // Build adjacency lists
    for step in steps {
      for dependency in &step.dependencies {
        let upstream = reverse_adjacency.entry(step.step_id.clone()).or_default();
        if upstream.contains(dependency) {
          continue;
        }
        upstream.push(dependency.clone());
        adjacency
          .entry(dependency.clone())
          .or_default()
          .push(step.step_id.clone());
      }
    }

    Self {
      adjacency,
      reverse_adjacency,
    }
  }

  /// Get steps that directly depend on the given step.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get the direct dependencies of a step.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// All direct and transitive dependents of a step, in breadth-first order.
  pub fn dependents_of(&self, step_id: &str) -> Vec<String> {
    walk(step_id, |id| self.downstream(id))
  }

  /// All direct and transitive dependencies of a step, in breadth-first
  /// order.
  pub fn dependencies_of(&self, step_id: &str) -> Vec<String> {
    walk(step_id, |id| self.upstream(id))
  }
}

/// Breadth-first reachability from `start`, excluding `start` itself.
fn walk<'a>(start: &'a str, next: impl Fn(&str) -> &'a [String]) -> Vec<String> {
  let mut seen: HashSet<&str> = HashSet::new();
  let mut queue: VecDeque<&str> = VecDeque::from([start]);
  let mut reached = Vec::new();

  while let Some(current) = queue.pop_front() {
    for step in next(current) {
      let step = step.as_str();
      if step != start && seen.insert(step) {
        reached.push(step.to_string());
        queue.push_back(step);
      }
    }
  }

  reached
}

#[cfg(test)]
mod tests {
  use super::*;
  use zkflow_config::StepType;

  fn steps() -> Vec<StepDef> {
    vec![
      StepDef::new("transform", StepType::Transform),
      StepDef::new("generate", StepType::Generate).depends_on(["transform", "transform"]),
      StepDef::new("verify", StepType::Verify).depends_on(["generate"]),
      StepDef::new("share", StepType::Share).depends_on(["verify"]),
      StepDef::new("audit", StepType::custom("audit")),
    ]
  }

  #[test]
  fn test_edges_are_deduplicated() {
    let graph = Graph::new(&steps());
    assert_eq!(graph.upstream("generate"), ["transform"]);
    assert_eq!(graph.downstream("transform"), ["generate"]);
  }

  #[test]
  fn test_transitive_dependencies() {
    let graph = Graph::new(&steps());
    assert_eq!(
      graph.dependencies_of("share"),
      vec!["verify", "generate", "transform"]
    );
    assert!(graph.dependencies_of("transform").is_empty());
  }

  #[test]
  fn test_transitive_dependents() {
    let graph = Graph::new(&steps());
    assert_eq!(graph.dependents_of("generate"), vec!["verify", "share"]);
    assert!(graph.dependents_of("audit").is_empty());
    assert!(graph.dependents_of("missing").is_empty());
  }
}
