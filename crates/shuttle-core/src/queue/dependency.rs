//! Dependency graph for managing task dependencies.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges must be kept in sync

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

/// Dependency graph for tracking task dependencies.
///
/// A dependency may point at a task that is not registered (yet, or anymore).
/// The graph does not care; readiness is decided by the registry.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: task -> tasks that depend on it
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency: `task` depends on `depends_on` ("task waits for depends_on").
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    /// Remove a single dependency edge, keeping both maps in sync.
    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drop every outgoing edge of `task`.
    ///
    /// Incoming edges stay: tasks that still depend on a removed task keep
    /// waiting for it (fail-closed).
    pub fn remove_task(&mut self, task: TaskId) {
        for dep in self.get_dependencies(task) {
            self.remove_dependency(task, dep);
        }
    }

    /// Tasks that depend on `task`. They may have other dependencies too.
    pub fn get_waiting_tasks(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Find a cycle passing through `task`, if any.
    ///
    /// When the graph was acyclic before `task`'s edges were added, this is
    /// the only place a new cycle can be. The returned path starts and ends
    /// at `task`.
    pub fn find_cycle_through(&self, task: TaskId) -> Option<Vec<TaskId>> {
        let mut visited = HashSet::new();
        let mut stack = vec![self.get_dependencies(task)];
        let mut path = vec![task];
        visited.insert(task);

        while let Some(pending) = stack.last_mut() {
            let Some(next) = pending.pop() else {
                stack.pop();
                path.pop();
                continue;
            };
            if next == task {
                let mut cycle = path.clone();
                cycle.push(task);
                return Some(cycle);
            }
            if visited.insert(next) {
                path.push(next);
                stack.push(self.get_dependencies(next));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<const N: usize>() -> [TaskId; N] {
        std::array::from_fn(|_| TaskId::generate())
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(graph.get_dependencies(TaskId::generate()).is_empty());
    }

    #[test]
    fn add_dependency_creates_both_edges() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_dependency(b, a); // B depends on A

        assert!(graph.get_dependencies(a).is_empty());
        assert_eq!(graph.get_dependencies(b), vec![a]);
        assert_eq!(graph.get_waiting_tasks(a), vec![b]);
    }

    #[test]
    fn remove_task_drops_outgoing_edges_only() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids();

        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.remove_task(b);

        assert!(graph.get_dependencies(b).is_empty());
        assert!(graph.get_waiting_tasks(a).is_empty());
        assert_eq!(graph.get_dependencies(c), vec![b]);
    }

    #[test]
    fn two_node_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_dependency(a, b);
        graph.add_dependency(b, a);

        assert_eq!(graph.find_cycle_through(b), Some(vec![b, a, b]));
    }

    #[test]
    fn detect_longer_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        // B -> C -> D -> B, with A hanging off B
        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.add_dependency(d, c);
        graph.add_dependency(b, d);

        assert!(graph.find_cycle_through(b).is_some());
        assert!(graph.find_cycle_through(d).is_some());
        assert!(graph.find_cycle_through(a).is_none());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        graph.add_dependency(b, a);
        graph.add_dependency(c, a);
        graph.add_dependency(d, b);
        graph.add_dependency(d, c);

        for node in [a, b, c, d] {
            assert!(graph.find_cycle_through(node).is_none());
        }
    }

    #[test]
    fn cycle_through_returns_closed_path() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids();

        graph.add_dependency(a, b);
        graph.add_dependency(b, c);
        graph.add_dependency(c, a);

        let cycle = graph.find_cycle_through(a).unwrap();
        assert_eq!(cycle, vec![a, b, c, a]);
    }
}
