//! Dependency graph over plan steps
//!
//! Dependencies are inferred from parsed placeholder references, never
//! declared. The graph is built once per plan, checked for unknown references
//! and cycles, then turned into a sequential order or parallel layers.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::Plan;

/// How the orchestrator schedules steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One step at a time, declaration order
    #[default]
    Sequential,
    /// Independent steps of a layer run concurrently
    Dag,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Dag => write!(f, "dag"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(ExecutionMode::Sequential),
            "dag" | "parallel" => Ok(ExecutionMode::Dag),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

/// Errors building the graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Step {step_id} references unknown step {dependency}")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("Dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),
}

/// Scheduling order produced from the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOrder {
    Sequential(Vec<String>),
    Layered(Vec<Vec<String>>),
}

impl ExecutionOrder {
    /// All step ids, flattened in scheduling order
    pub fn step_ids(&self) -> Vec<String> {
        match self {
            ExecutionOrder::Sequential(ids) => ids.clone(),
            ExecutionOrder::Layered(layers) => layers.iter().flatten().cloned().collect(),
        }
    }

    /// Batches admitted one after another; sequential order is one step per batch
    pub fn batches(&self) -> Vec<Vec<String>> {
        match self {
            ExecutionOrder::Sequential(ids) => ids.iter().map(|id| vec![id.clone()]).collect(),
            ExecutionOrder::Layered(layers) => layers.clone(),
        }
    }
}

/// Adjacency structure of a validated plan
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    order: Vec<String>,
    depends_on: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build from parsed placeholder references
    ///
    /// Rejects duplicate step ids, references to unknown steps and cycles.
    pub fn build(plan: &Plan) -> Result<Self, GraphError> {
        debug!(step_count = plan.len(), "DependencyGraph::build: called");
        let mut order = Vec::with_capacity(plan.len());
        let mut seen = HashSet::new();
        for step in &plan.steps {
            if !seen.insert(step.step_id.as_str()) {
                debug!(step_id = %step.step_id, "DependencyGraph::build: duplicate step");
                return Err(GraphError::DuplicateStep(step.step_id.clone()));
            }
            order.push(step.step_id.clone());
        }

        let mut depends_on: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = order.iter().map(|id| (id.clone(), Vec::new())).collect();

        for step in &plan.steps {
            let mut deps: Vec<String> = Vec::new();
            for reference in step.references() {
                let dep = reference.source_step_id;
                if !seen.contains(dep.as_str()) {
                    debug!(step_id = %step.step_id, %dep, "DependencyGraph::build: unknown dependency");
                    return Err(GraphError::UnknownDependency {
                        step_id: step.step_id.clone(),
                        dependency: dep,
                    });
                }
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
            for dep in &deps {
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(step.step_id.clone());
                }
            }
            depends_on.insert(step.step_id.clone(), deps);
        }

        let graph = Self {
            order,
            depends_on,
            dependents,
        };
        graph.check_cycles()?;
        debug!("DependencyGraph::build: complete");
        Ok(graph)
    }

    fn check_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut cycle_path = Vec::new();

        for step_id in &self.order {
            if !visited.contains(step_id.as_str())
                && self.has_cycle_dfs(step_id, &mut visited, &mut rec_stack, &mut cycle_path)
            {
                debug!(?cycle_path, "DependencyGraph::check_cycles: cycle detected");
                return Err(GraphError::Cycle { path: cycle_path });
            }
        }
        Ok(())
    }

    fn has_cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        cycle_path: &mut Vec<String>,
    ) -> bool {
        visited.insert(node);
        rec_stack.insert(node);
        cycle_path.push(node.to_string());

        for dep in self.depends_on(node) {
            if !visited.contains(dep.as_str()) {
                if self.has_cycle_dfs(dep, visited, rec_stack, cycle_path) {
                    return true;
                }
            } else if rec_stack.contains(dep.as_str()) {
                debug!(%node, %dep, "has_cycle_dfs: back edge found");
                cycle_path.push(dep.clone());
                return true;
            }
        }

        rec_stack.remove(node);
        cycle_path.pop();
        false
    }

    /// Direct dependencies of a step, in first-reference order
    pub fn depends_on(&self, step_id: &str) -> &[String] {
        self.depends_on.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps that directly reference the given step
    pub fn dependents(&self, step_id: &str) -> &[String] {
        self.dependents.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Step ids in declaration order
    pub fn step_ids(&self) -> &[String] {
        &self.order
    }

    /// True when `step_id` depends on `other`, directly or transitively
    pub fn reaches(&self, step_id: &str, other: &str) -> bool {
        let mut stack: Vec<&str> = self.depends_on(step_id).iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == other {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.depends_on(current).iter().map(String::as_str));
            }
        }
        false
    }

    /// Topological layering
    ///
    /// Layer 0 holds steps with no dependencies; layer k holds steps whose
    /// dependencies all sit in earlier layers. Declaration order is kept
    /// inside each layer.
    pub fn layers(&self) -> Vec<Vec<String>> {
        debug!(step_count = self.order.len(), "DependencyGraph::layers: called");
        let mut placed: HashSet<&str> = HashSet::new();
        let mut layers = Vec::new();

        while placed.len() < self.order.len() {
            let layer: Vec<&String> = self
                .order
                .iter()
                .filter(|id| !placed.contains(id.as_str()))
                .filter(|id| self.depends_on(id).iter().all(|dep| placed.contains(dep.as_str())))
                .collect();
            if layer.is_empty() {
                // unreachable for a graph that passed check_cycles
                break;
            }
            placed.extend(layer.iter().map(|id| id.as_str()));
            debug!(layer = layers.len(), size = layer.len(), "DependencyGraph::layers: layer formed");
            layers.push(layer.into_iter().cloned().collect());
        }
        layers
    }

    pub fn execution_order(&self, mode: ExecutionMode) -> ExecutionOrder {
        debug!(%mode, "DependencyGraph::execution_order: called");
        match mode {
            ExecutionMode::Sequential => ExecutionOrder::Sequential(self.order.clone()),
            ExecutionMode::Dag => ExecutionOrder::Layered(self.layers()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Step;
    use proptest::prelude::*;
    use serde_json::json;

    fn scenario_d() -> Plan {
        Plan::new(vec![
            Step::new("s1", "search", json!({"q": "a"})),
            Step::new("s2", "search", json!({"q": "b"})),
            Step::new("s3", "merge", json!({"left": "{{s1.results}}", "right": "{{s2.results}}"})),
        ])
    }

    #[test]
    fn test_dag_layers() {
        let graph = DependencyGraph::build(&scenario_d()).unwrap();
        assert_eq!(graph.depends_on("s3"), ["s1", "s2"]);
        assert_eq!(graph.dependents("s1"), ["s3"]);
        assert_eq!(
            graph.execution_order(ExecutionMode::Dag),
            ExecutionOrder::Layered(vec![vec!["s1".into(), "s2".into()], vec!["s3".into()]])
        );
    }

    #[test]
    fn test_sequential_is_declaration_order() {
        let graph = DependencyGraph::build(&scenario_d()).unwrap();
        let order = graph.execution_order(ExecutionMode::Sequential);
        assert_eq!(order.step_ids(), vec!["s1", "s2", "s3"]);
        assert_eq!(order.batches().len(), 3);
    }

    #[test]
    fn test_unknown_dependency() {
        let plan = Plan::new(vec![Step::new("s1", "fetch", json!({"url": "{{s9.url}}"}))]);
        let err = DependencyGraph::build(&plan).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                step_id: "s1".into(),
                dependency: "s9".into()
            }
        );
    }

    #[test]
    fn test_cycle_detected() {
        let plan = Plan::new(vec![
            Step::new("a", "t", json!({"x": "{{b.y}}"})),
            Step::new("b", "t", json!({"y": "{{a.x}}"})),
        ]);
        match DependencyGraph::build(&plan).unwrap_err() {
            GraphError::Cycle { path } => {
                assert_eq!(path.first(), Some(&"a".to_string()));
                assert_eq!(path.last(), Some(&"a".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let plan = Plan::new(vec![Step::new("a", "t", json!({"x": "{{a.x}}"}))]);
        assert!(matches!(DependencyGraph::build(&plan), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_reaches_transitively() {
        let plan = Plan::new(vec![
            Step::new("s1", "t", json!({})),
            Step::new("s2", "t", json!({"a": "{{s1.a}}"})),
            Step::new("s3", "t", json!({"b": "{{s2.b}}"})),
        ]);
        let graph = DependencyGraph::build(&plan).unwrap();
        assert!(graph.reaches("s3", "s1"));
        assert!(!graph.reaches("s1", "s3"));
    }

    /// Backward-only random plans: step i may reference any j < i
    fn backward_plan() -> impl Strategy<Value = Plan> {
        (1usize..12)
            .prop_flat_map(|n| proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..3), n))
            .prop_map(|refs| {
                let steps = refs
                    .iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let mut input = serde_json::Map::new();
                        if i > 0 {
                            for (k, pick) in picks.iter().enumerate() {
                                let j = pick.index(i);
                                input.insert(format!("p{k}"), json!(format!("{{{{s{j}.out}}}}")));
                            }
                        }
                        Step::new(format!("s{i}"), "t", serde_json::Value::Object(input))
                    })
                    .collect();
                Plan::new(steps)
            })
    }

    proptest! {
        #[test]
        fn prop_layers_respect_dependencies(plan in backward_plan()) {
            let graph = DependencyGraph::build(&plan).unwrap();
            let layers = graph.layers();
            let layer_of: HashMap<&str, usize> = layers
                .iter()
                .enumerate()
                .flat_map(|(k, layer)| layer.iter().map(move |id| (id.as_str(), k)))
                .collect();

            prop_assert_eq!(layer_of.len(), plan.len());
            for step in &plan.steps {
                for dep in graph.depends_on(&step.step_id) {
                    prop_assert!(layer_of[dep.as_str()] < layer_of[step.step_id.as_str()]);
                }
            }
            for layer in &layers {
                for a in layer {
                    for b in layer {
                        prop_assert!(!graph.reaches(a, b));
                    }
                }
            }
        }
    }
}
