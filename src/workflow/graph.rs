//! 工作流依赖图
//!
//! 邻接表 + 入度表：构建时用 Kahn 算法检查环，运行 / 恢复时据此计算就绪步骤。

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::workflow::types::*;

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// 定义顺序
    order: Vec<StepId>,
    /// 邻接表：步骤 ID -> 依赖该步骤的步骤列表
    pub adjacency: HashMap<StepId, Vec<StepId>>,
    /// 步骤 ID -> 它的前置步骤
    pub dependencies: HashMap<StepId, Vec<StepId>>,
}

impl WorkflowGraph {
    /// 构建并校验：步骤 ID 唯一、依赖存在、无环
    pub fn new(steps: &[StepConfig]) -> Result<Self, WorkflowError> {
        let mut seen = HashSet::new();
        for step in steps {
            if !seen.insert(step.id.as_str()) {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        let mut adjacency: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut dependencies: HashMap<StepId, Vec<StepId>> = HashMap::new();
        for step in steps {
            adjacency.entry(step.id.clone()).or_default();
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(WorkflowError::InvalidConfiguration(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
                adjacency.entry(dep.clone()).or_default().push(step.id.clone());
            }
            dependencies.insert(step.id.clone(), step.depends_on.clone());
        }

        let graph = Self {
            order: steps.iter().map(|s| s.id.clone()).collect(),
            adjacency,
            dependencies,
        };
        graph.topological_order()?;
        Ok(graph)
    }

    /// 拓扑序；存在环时返回 CyclicDependency
    pub fn topological_order(&self) -> Result<Vec<StepId>, WorkflowError> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies.get(id).map_or(0, Vec::len)))
            .collect();
        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(id) = queue.pop_front() {
            sorted.push(id.to_string());
            for next in self.adjacency.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next.as_str());
                    }
                }
            }
        }

        if sorted.len() == self.order.len() {
            Ok(sorted)
        } else {
            Err(WorkflowError::CyclicDependency)
        }
    }

    /// 就绪步骤：未开始（Waiting / Ready）且所有前置步骤已完成或跳过
    pub fn ready_steps(&self, states: &BTreeMap<StepId, StepProgress>) -> Vec<StepId> {
        self.order
            .iter()
            .filter(|id| {
                matches!(
                    states.get(*id).map(|s| s.state),
                    Some(TaskState::Waiting | TaskState::Ready) | None
                )
            })
            .filter(|id| {
                self.dependencies
                    .get(*id)
                    .into_iter()
                    .flatten()
                    .all(|dep| states.get(dep).is_some_and(|s| s.state.satisfies_dependents()))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> StepConfig {
        StepConfig {
            id: id.to_string(),
            name: format!("Step {id}"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            max_retries: 0,
        }
    }

    fn states(pairs: &[(&str, TaskState)]) -> BTreeMap<StepId, StepProgress> {
        pairs
            .iter()
            .map(|(id, state)| {
                (
                    id.to_string(),
                    StepProgress {
                        state: *state,
                        ..StepProgress::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_graph_construction_sequential() {
        let graph = WorkflowGraph::new(&[step("a", &[]), step("b", &["a"])]).unwrap();
        assert_eq!(graph.adjacency.get("a"), Some(&vec!["b".to_string()]));
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = WorkflowGraph::new(&[step("a", &["b"]), step("b", &["a"])]).unwrap_err();
        assert!(matches!(err, WorkflowError::CyclicDependency));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = WorkflowGraph::new(&[step("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfiguration(_)));
        let err = WorkflowGraph::new(&[step("a", &[]), step("a", &[])]).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_ready_steps_fan_in() {
        let graph =
            WorkflowGraph::new(&[step("a", &[]), step("b", &[]), step("c", &["a", "b"])]).unwrap();

        let s = states(&[
            ("a", TaskState::Waiting),
            ("b", TaskState::Waiting),
            ("c", TaskState::Waiting),
        ]);
        assert_eq!(graph.ready_steps(&s), vec!["a", "b"]);

        let s = states(&[
            ("a", TaskState::Completed),
            ("b", TaskState::Running),
            ("c", TaskState::Waiting),
        ]);
        assert!(graph.ready_steps(&s).is_empty());

        let s = states(&[
            ("a", TaskState::Completed),
            ("b", TaskState::Skipped),
            ("c", TaskState::Waiting),
        ]);
        assert_eq!(graph.ready_steps(&s), vec!["c"]);
    }
}
