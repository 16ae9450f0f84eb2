//! Task graph on petgraph with Kahn topological sorting.
//!
//! Nodes are ordered by external id, and that order breaks ties everywhere
//! (queue order, cycle reporting), so results are reproducible regardless of
//! storage order.

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{Error, Result};
use crate::model::{Dependency, DependencyType, Task, TaskId};

/// A typed edge between two node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Predecessor index.
    pub from: usize,
    /// Successor index.
    pub to: usize,
    /// Constraint kind.
    pub kind: DependencyType,
    /// Lag in days.
    pub lag: i64,
}

/// Tasks plus the dependency edges among them.
///
/// Node weights are slots in `tasks`; node `i` always holds slot `i`.
#[derive(Debug, Clone)]
pub struct WorkGraph {
    graph: DiGraph<usize, Edge>,
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
}

impl WorkGraph {
    /// Builds a graph over `tasks`. Dependencies with an endpoint outside
    /// `tasks` are ignored.
    #[must_use]
    pub fn build(mut tasks: Vec<Task>, dependencies: &[Dependency]) -> Self {
        tasks.sort_by(|a, b| a.external_id.cmp(&b.external_id).then_with(|| a.id.cmp(&b.id)));
        let index: HashMap<TaskId, usize> =
            tasks.iter().enumerate().map(|(i, t)| (t.id.clone(), i)).collect();

        let mut graph = DiGraph::with_capacity(tasks.len(), dependencies.len());
        for slot in 0..tasks.len() {
            graph.add_node(slot);
        }
        for dep in dependencies {
            let (Some(&from), Some(&to)) =
                (index.get(&dep.predecessor_id), index.get(&dep.successor_id))
            else {
                continue;
            };
            let edge = Edge { from, to, kind: dep.kind, lag: dep.lag_days };
            graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), edge);
        }

        Self { graph, tasks, index }
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// The task at `idx`.
    #[must_use]
    pub fn task(&self, idx: usize) -> &Task {
        &self.tasks[idx]
    }

    /// Mutable access to the task at `idx`.
    pub fn task_mut(&mut self, idx: usize) -> &mut Task {
        &mut self.tasks[idx]
    }

    /// All tasks, in node order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Index of a task id.
    #[must_use]
    pub fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Edges into `idx`, ordered by endpoints.
    pub fn predecessors(&self, idx: usize) -> impl Iterator<Item = Edge> {
        self.edges(idx, Direction::Incoming).into_iter()
    }

    /// Edges out of `idx`, ordered by endpoints.
    pub fn successors(&self, idx: usize) -> impl Iterator<Item = Edge> {
        self.edges(idx, Direction::Outgoing).into_iter()
    }

    fn edges(&self, idx: usize, direction: Direction) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .graph
            .edges_directed(NodeIndex::new(idx), direction)
            .map(|e| *e.weight())
            .collect();
        edges.sort_by_key(|e| (e.from, e.to));
        edges
    }

    /// Sorted neighbor indices, one entry per edge.
    fn neighbors(&self, idx: usize, direction: Direction) -> Vec<usize> {
        let mut nodes: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(idx), direction)
            .map(NodeIndex::index)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Kahn topological order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] with the literal cycle, e.g.
    /// `[A, B, C, A]`, starting at its lowest-ordered task.
    pub fn toposort(&self) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut queue: VecDeque<usize> = (0..self.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for next in self.neighbors(idx, Direction::Outgoing) {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() == self.len() {
            return Ok(order);
        }
        let stuck: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        Err(Error::CycleDetected { cycle: self.extract_cycle(&stuck) })
    }

    /// Fails when any dependency chain is longer than `cap` hops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DepthExceeded`] carrying the first over-long chain.
    pub fn check_depth(&self, order: &[usize], cap: usize) -> Result<()> {
        let mut depth = vec![0_usize; self.len()];
        let mut parent: Vec<Option<usize>> = vec![None; self.len()];
        for &idx in order {
            for next in self.neighbors(idx, Direction::Outgoing) {
                if depth[idx] + 1 > depth[next] {
                    depth[next] = depth[idx] + 1;
                    parent[next] = Some(idx);
                }
            }
            if depth[idx] > cap {
                let mut chain = vec![self.tasks[idx].external_id.clone()];
                let mut cursor = parent[idx];
                while let Some(p) = cursor {
                    chain.push(self.tasks[p].external_id.clone());
                    cursor = parent[p];
                }
                chain.reverse();
                return Err(Error::DepthExceeded { cap, chain });
            }
        }
        Ok(())
    }

    /// Walks predecessors among `stuck` nodes until one repeats. Every stuck
    /// node has a stuck predecessor, so the walk always closes a cycle.
    fn extract_cycle(&self, stuck: &[bool]) -> Vec<String> {
        let Some(start) = stuck.iter().position(|&s| s) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut seen_at: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut cursor = start;
        loop {
            let Some(prev) = self
                .neighbors(cursor, Direction::Incoming)
                .into_iter()
                .find(|&p| stuck[p])
            else {
                break;
            };
            if let Some(&first) = seen_at.get(&prev) {
                let mut cycle: Vec<usize> = path[first..].to_vec();
                cycle.reverse();
                let lowest = cycle.iter().enumerate().min_by_key(|(_, &n)| n).map_or(0, |(i, _)| i);
                cycle.rotate_left(lowest);
                let mut names: Vec<String> =
                    cycle.iter().map(|&n| self.tasks[n].external_id.clone()).collect();
                if let Some(first_name) = names.first().cloned() {
                    names.push(first_name);
                }
                return names;
            }
            seen_at.insert(prev, path.len());
            path.push(prev);
            cursor = prev;
        }
        vec![self.tasks[start].external_id.clone()]
    }
}
