//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! This module provides the TaskGraph structure that represents task
//! dependencies as a directed acyclic graph. Nodes are tasks, and an edge
//! `a -> b` means `b` consumes the output of `a`.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::core::task::{DependencyResults, Outcome, Task, TaskDescriptor, TaskId, TaskStatus};
use crate::error::{Error, Result};

/// The task dependency graph for one query.
///
/// Built once from planner output and validated at construction: ids are
/// unique, every dependency names a known task, and there are no cycles.
/// After that only status transitions happen, and only through the
/// scheduler.
pub struct TaskGraph {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index from TaskId to NodeIndex, ordered by id.
    index: BTreeMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Build a graph from planner descriptors.
    ///
    /// # Errors
    /// Returns `MalformedGraph` if:
    /// - An id appears more than once
    /// - A dependency names an unknown id
    /// - A task depends on itself, directly or transitively
    pub fn construct(descriptors: Vec<TaskDescriptor>) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(descriptors.len(), 0);
        let mut index = BTreeMap::new();

        for descriptor in descriptors {
            if index.contains_key(&descriptor.id) {
                return Err(Error::MalformedGraph(format!(
                    "duplicate task id {}",
                    descriptor.id
                )));
            }
            let id = descriptor.id.clone();
            let node = graph.add_node(Task::from_descriptor(descriptor));
            index.insert(id, node);
        }

        let mut edges = Vec::new();
        for (id, &node) in &index {
            let task: &Task = &graph[node];
            for dep in &task.dependencies {
                if dep == id {
                    return Err(Error::MalformedGraph(format!(
                        "task {} depends on itself",
                        id
                    )));
                }
                let dep_node = index.get(dep).ok_or_else(|| {
                    Error::MalformedGraph(format!("task {} depends on unknown task {}", id, dep))
                })?;
                edges.push((*dep_node, node));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        toposort(&graph, None).map_err(|cycle| {
            Error::MalformedGraph(format!(
                "dependency cycle involving task {}",
                graph[cycle.node_id()].id
            ))
        })?;

        Ok(Self { graph, index })
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&node| &self.graph[node])
    }

    fn get_task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        let node = *self
            .index
            .get(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        Ok(&mut self.graph[node])
    }

    /// All tasks, ascending by id.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.index.values().map(move |&node| &self.graph[node])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of tasks currently in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks().filter(|t| t.status() == status).count()
    }

    pub fn running_count(&self) -> usize {
        self.count(TaskStatus::Running)
    }

    /// Tasks that consume the output of `id`.
    pub fn dependents(&self, id: &TaskId) -> Vec<&Task> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut dependents: Vec<&Task> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| &self.graph[n])
            .collect();
        dependents.sort_by(|a, b| a.id.cmp(&b.id));
        dependents
    }

    // ========== Scheduling Operations ==========

    /// Pending tasks whose dependencies are all `Done`, ascending by id.
    ///
    /// Computed lazily on every call; nothing is cached, so repeated calls
    /// without an intervening mutation yield the same sequence.
    pub fn ready_tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.index.values().filter_map(move |&node| {
            let task = &self.graph[node];
            if task.status() != TaskStatus::Pending {
                return None;
            }
            let deps_done = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .all(|dep| self.graph[dep].status() == TaskStatus::Done);
            deps_done.then_some(task)
        })
    }

    /// True when every task is `Done`, or when nothing is `Ready` or
    /// `Running` and at least one task has `Failed`.
    pub fn is_terminal(&self) -> bool {
        if self.tasks().all(|t| t.status() == TaskStatus::Done) {
            return true;
        }
        let active = self
            .tasks()
            .any(|t| matches!(t.status(), TaskStatus::Ready | TaskStatus::Running));
        let failed = self.tasks().any(|t| t.status() == TaskStatus::Failed);
        !active && failed
    }

    /// Pending -> Ready. Used by the scheduler.
    pub fn mark_ready(&mut self, id: &TaskId) -> Result<()> {
        self.get_task_mut(id)?.mark_ready()
    }

    /// Ready -> Running. Used by the scheduler.
    pub fn mark_running(&mut self, id: &TaskId) -> Result<()> {
        self.get_task_mut(id)?.start()
    }

    /// Running -> Done (with result) or Failed (with error).
    ///
    /// # Errors
    /// `InvalidTransition` if the task is not `Running`, `TaskNotFound` if
    /// the id is unknown.
    pub fn apply_outcome(&mut self, id: &TaskId, outcome: Outcome) -> Result<()> {
        self.get_task_mut(id)?.finish(outcome)
    }

    /// Outputs of `id`'s dependencies, keyed by dependency id.
    ///
    /// # Errors
    /// `Validation` if a dependency has not finished successfully.
    pub fn dependency_results(&self, id: &TaskId) -> Result<DependencyResults> {
        let task = self
            .get_task(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        task.dependencies
            .iter()
            .map(|dep| {
                self.get_task(dep)
                    .and_then(|d| d.result())
                    .map(|r| (dep.clone(), r.to_string()))
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "dependency {} of task {} has no result",
                            dep, id
                        ))
                    })
            })
            .collect()
    }

    /// Results of all `Done` tasks.
    pub fn results(&self) -> BTreeMap<TaskId, String> {
        self.tasks()
            .filter_map(|t| t.result().map(|r| (t.id.clone(), r.to_string())))
            .collect()
    }

    pub fn failed_ids(&self) -> BTreeSet<TaskId> {
        self.tasks()
            .filter(|t| t.status() == TaskStatus::Failed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Pending tasks that can never run because an upstream task failed.
    pub fn blocked_ids(&self) -> BTreeSet<TaskId> {
        let reversed = Reversed(&self.graph);
        let mut blocked = BTreeSet::new();
        for (id, node) in &self.index {
            if self.graph[*node].status() != TaskStatus::Pending {
                continue;
            }
            let mut dfs = Dfs::new(reversed, *node);
            while let Some(upstream) = dfs.next(reversed) {
                if self.graph[upstream].status() == TaskStatus::Failed {
                    blocked.insert(id.clone());
                    break;
                }
            }
        }
        blocked
    }

    /// Tasks in an order where every task follows its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            Error::MalformedGraph(format!(
                "dependency cycle involving task {}",
                self.graph[cycle.node_id()].id
            ))
        })?;
        Ok(sorted.into_iter().map(|node| &self.graph[node]).collect())
    }

    /// Owned copy of every task, for diagnostics.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            tasks: self.tasks().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Point-in-time copy of a graph's tasks, ascending by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub tasks: Vec<Task>,
}

impl GraphSnapshot {
    pub fn status_of(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| &t.id == id).map(|t| t.status())
    }

    pub fn failed_ids(&self) -> BTreeSet<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Failed)
            .map(|t| t.id.clone())
            .collect()
    }
}
