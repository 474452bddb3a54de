//! Dependency graph for build tasks
//!
//! Rejects self-edges and cycles as edges are added, so a constructed graph
//! is always a DAG. Uses petgraph for reachability and topological order.

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use thiserror::Error;

use super::id::TaskId;
use super::task::Task;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Adding dependency would create a cycle: {0} -> {1}")]
    CycleDetected(TaskId, TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Self-dependency not allowed: {0}")]
    SelfDependency(TaskId),

    #[error("Task declared twice: {0}")]
    DuplicateTask(TaskId),
}

/// A dependency graph over task IDs
///
/// Edge direction is dependency -> dependent.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    node_map: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a task set
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Result<Self, GraphError> {
        let mut graph = Self::new();

        let tasks: Vec<_> = tasks.into_iter().collect();
        for task in &tasks {
            graph.add_task(task.id.clone())?;
        }

        for task in &tasks {
            for dep_id in &task.dependencies {
                graph.add_dependency(&task.id, dep_id)?;
            }
        }

        Ok(graph)
    }

    pub fn add_task(&mut self, task_id: TaskId) -> Result<(), GraphError> {
        if self.node_map.contains_key(&task_id) {
            return Err(GraphError::DuplicateTask(task_id));
        }
        let idx = self.graph.add_node(task_id.clone());
        self.node_map.insert(task_id, idx);
        Ok(())
    }

    /// Adds an edge: `task` depends on `depends_on`
    pub fn add_dependency(&mut self, task: &TaskId, depends_on: &TaskId) -> Result<(), GraphError> {
        if task == depends_on {
            return Err(GraphError::SelfDependency(task.clone()));
        }

        let task_idx = *self
            .node_map
            .get(task)
            .ok_or_else(|| GraphError::TaskNotFound(task.clone()))?;
        let dep_idx = *self
            .node_map
            .get(depends_on)
            .ok_or_else(|| GraphError::TaskNotFound(depends_on.clone()))?;

        if self.graph.find_edge(dep_idx, task_idx).is_some() {
            return Ok(());
        }

        // A path task -> depends_on means the new edge closes a loop
        if has_path_connecting(&self.graph, task_idx, dep_idx, None) {
            return Err(GraphError::CycleDetected(task.clone(), depends_on.clone()));
        }

        self.graph.add_edge(dep_idx, task_idx, ());
        Ok(())
    }

    /// Direct dependencies of a task, sorted
    pub fn dependencies(&self, task_id: &TaskId) -> Vec<TaskId> {
        self.neighbors(task_id, Direction::Incoming)
    }

    /// Direct dependents of a task, sorted
    pub fn dependents(&self, task_id: &TaskId) -> Vec<TaskId> {
        self.neighbors(task_id, Direction::Outgoing)
    }

    fn neighbors(&self, task_id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.node_map.get(task_id) else {
            return vec![];
        };
        let mut ids: Vec<TaskId> = self
            .graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect();
        ids.sort();
        ids
    }

    /// Every task reachable downstream of `task_id`, sorted
    pub fn transitive_dependents(&self, task_id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.node_map.get(task_id) else {
            return vec![];
        };
        let mut dfs = petgraph::visit::Dfs::new(&self.graph, start);
        let mut ids = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                if let Some(id) = self.graph.node_weight(idx) {
                    ids.push(id.clone());
                }
            }
        }
        ids.sort();
        ids
    }

    /// All tasks, dependencies before dependents
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            let id = self.graph[cycle.node_id()].clone();
            GraphError::CycleDetected(id.clone(), id)
        })?;
        Ok(order
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect())
    }

    /// Topological leveling
    ///
    /// A task's level is one past the deepest of its dependencies; tasks
    /// without dependencies sit in level 0. Each level is sorted by ID.
    pub fn levels(&self) -> Result<Vec<Vec<TaskId>>, GraphError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            let id = self.graph[cycle.node_id()].clone();
            GraphError::CycleDetected(id.clone(), id)
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        let mut levels: Vec<Vec<TaskId>> = Vec::new();
        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(self.graph[idx].clone());
        }

        for level in &mut levels {
            level.sort();
        }
        Ok(levels)
    }

    /// Edges as `(dependency, dependent)`, sorted
    pub fn edges(&self) -> Vec<(TaskId, TaskId)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| (self.graph[from].clone(), self.graph[to].clone()))
            .collect();
        edges.sort();
        edges
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.node_map.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskKind;

    fn make_task_id(seq: u32) -> TaskId {
        TaskId::new("render_page", &[format!("page-{}", seq).as_str()])
    }

    fn graph_with(n: u32) -> (DependencyGraph, Vec<TaskId>) {
        let mut graph = DependencyGraph::new();
        let ids: Vec<_> = (1..=n).map(make_task_id).collect();
        for id in &ids {
            graph.add_task(id.clone()).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.levels().unwrap(), Vec::<Vec<TaskId>>::new());
    }

    #[test]
    fn duplicate_task_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_task(make_task_id(1)).unwrap();
        assert_eq!(
            graph.add_task(make_task_id(1)),
            Err(GraphError::DuplicateTask(make_task_id(1)))
        );
    }

    #[test]
    fn add_dependency() {
        let (mut graph, ids) = graph_with(2);
        graph.add_dependency(&ids[1], &ids[0]).unwrap();

        assert_eq!(graph.dependencies(&ids[1]), vec![ids[0].clone()]);
        assert_eq!(graph.dependents(&ids[0]), vec![ids[1].clone()]);
        assert_eq!(graph.edges(), vec![(ids[0].clone(), ids[1].clone())]);
    }

    #[test]
    fn repeated_edge_is_ignored() {
        let (mut graph, ids) = graph_with(2);
        graph.add_dependency(&ids[1], &ids[0]).unwrap();
        graph.add_dependency(&ids[1], &ids[0]).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn cycle_detection() {
        let (mut graph, ids) = graph_with(3);
        graph.add_dependency(&ids[1], &ids[0]).unwrap();
        graph.add_dependency(&ids[2], &ids[1]).unwrap();

        let result = graph.add_dependency(&ids[0], &ids[2]);
        assert!(matches!(result, Err(GraphError::CycleDetected(_, _))));
        // The rejected edge leaves the graph acyclic
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn self_dependency_rejected() {
        let (mut graph, ids) = graph_with(1);
        let result = graph.add_dependency(&ids[0], &ids[0]);
        assert!(matches!(result, Err(GraphError::SelfDependency(_))));
    }

    #[test]
    fn unknown_task_returns_error() {
        let (mut graph, ids) = graph_with(1);
        let result = graph.add_dependency(&ids[0], &make_task_id(9));
        assert!(matches!(result, Err(GraphError::TaskNotFound(_))));
    }

    #[test]
    fn topological_order() {
        let (mut graph, ids) = graph_with(3);
        graph.add_dependency(&ids[0], &ids[1]).unwrap();
        graph.add_dependency(&ids[1], &ids[2]).unwrap();

        let order = graph.topological_order().unwrap();
        let pos = |id: &TaskId| order.iter().position(|x| x == id).unwrap();

        assert!(pos(&ids[2]) < pos(&ids[1]));
        assert!(pos(&ids[1]) < pos(&ids[0]));
    }

    #[test]
    fn levels_follow_longest_path() {
        // 1 <- 2 <- 3, and 1 <- 3 directly; 4 independent
        let (mut graph, ids) = graph_with(4);
        graph.add_dependency(&ids[1], &ids[0]).unwrap();
        graph.add_dependency(&ids[2], &ids[1]).unwrap();
        graph.add_dependency(&ids[2], &ids[0]).unwrap();

        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 3);

        let mut first = vec![ids[0].clone(), ids[3].clone()];
        first.sort();
        assert_eq!(levels[0], first);
        assert_eq!(levels[1], vec![ids[1].clone()]);
        assert_eq!(levels[2], vec![ids[2].clone()]);
    }

    #[test]
    fn transitive_dependents() {
        let (mut graph, ids) = graph_with(4);
        graph.add_dependency(&ids[1], &ids[0]).unwrap();
        graph.add_dependency(&ids[2], &ids[1]).unwrap();

        let mut expected = vec![ids[1].clone(), ids[2].clone()];
        expected.sort();
        assert_eq!(graph.transitive_dependents(&ids[0]), expected);
        assert!(graph.transitive_dependents(&ids[3]).is_empty());
    }

    #[test]
    fn from_tasks() {
        let first = Task::new(
            TaskKind::RenderPage {
                source: "a".to_string(),
            },
            &["a"],
            "a",
        );
        let mut feed = Task::new(TaskKind::GenerateFeed, &[], "feed");
        feed.depend_on(&first.id);

        let graph = DependencyGraph::from_tasks([&first, &feed]).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.dependencies(&feed.id), vec![first.id.clone()]);
    }

    #[test]
    fn long_chain_levels() {
        let (mut graph, ids) = graph_with(500);
        for i in 1..500 {
            graph.add_dependency(&ids[i], &ids[i - 1]).unwrap();
        }
        assert_eq!(graph.levels().unwrap().len(), 500);
    }
}
