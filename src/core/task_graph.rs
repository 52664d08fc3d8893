//! Task dependency graph of a single job.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::descriptor::JobDescriptor;
use crate::core::ids::{JobId, TaskId};
use crate::core::RegistryError;

/// Directed graph over the tasks of one job. An edge `a -> b` means `b`
/// cannot start before `a` has produced its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraph {
    job_id: JobId,
    nodes: BTreeSet<TaskId>,
    edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl TaskGraph {
    /// An empty graph for `job_id`.
    #[must_use]
    pub const fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Graph of a job's task tree: one edge per spawned child and one per
    /// declared data dependency.
    #[must_use]
    pub fn from_job(job: &JobDescriptor) -> Self {
        let mut graph = Self::new(job.uuid);
        for task in job.tasks() {
            graph.add_task(task.uid);
            for child in &task.spawned {
                graph.add_dependency(task.uid, child.uid);
            }
            for upstream in &task.dependencies {
                graph.add_dependency(*upstream, task.uid);
            }
        }
        graph
    }

    /// Job this graph belongs to.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Add a node. Returns `false` if it was already present.
    pub fn add_task(&mut self, task: TaskId) -> bool {
        self.nodes.insert(task)
    }

    /// Add the edge `upstream -> downstream`, inserting both nodes.
    pub fn add_dependency(&mut self, upstream: TaskId, downstream: TaskId) {
        self.nodes.insert(upstream);
        self.nodes.insert(downstream);
        self.edges.entry(upstream).or_default().insert(downstream);
    }

    /// Whether `task` is a node.
    #[must_use]
    pub fn contains(&self, task: TaskId) -> bool {
        self.nodes.contains(&task)
    }

    /// All nodes in ascending id order.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.nodes.iter().copied()
    }

    /// Tasks that depend directly on `task`.
    pub fn successors(&self, task: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.edges.get(&task).into_iter().flatten().copied()
    }

    /// Tasks `task` depends on directly.
    #[must_use]
    pub fn predecessors(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .iter()
            .filter(|(_, downstream)| downstream.contains(&task))
            .map(|(upstream, _)| *upstream)
            .collect()
    }

    /// Tasks with no upstream dependency.
    #[must_use]
    pub fn roots(&self) -> Vec<TaskId> {
        let mut has_upstream = BTreeSet::new();
        for downstream in self.edges.values() {
            has_upstream.extend(downstream.iter().copied());
        }
        self.nodes.difference(&has_upstream).copied().collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Nodes ordered so every edge points forward (Kahn's algorithm, ties by id).
    ///
    /// # Errors
    ///
    /// [`RegistryError::InconsistentGraph`] if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, RegistryError> {
        let mut in_degree: BTreeMap<TaskId, usize> = self.nodes.iter().map(|t| (*t, 0)).collect();
        for downstream in self.edges.values() {
            for task in downstream {
                *in_degree.entry(*task).or_default() += 1;
            }
        }

        let mut ready: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(task, _)| *task)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(task) = ready.pop_front() {
            order.push(task);
            for next in self.successors(task) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(next);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(RegistryError::InconsistentGraph {
                job: self.job_id,
                reason: format!(
                    "dependency cycle among {} task(s)",
                    self.nodes.len() - order.len()
                ),
            })
        }
    }

    /// Check the graph against its job: same job id, every node is a task of
    /// the job, no cycles.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InconsistentGraph`] describing the first problem found.
    pub fn validate_against(&self, job: &JobDescriptor) -> Result<(), RegistryError> {
        if job.uuid != self.job_id {
            return Err(RegistryError::InconsistentGraph {
                job: self.job_id,
                reason: format!("graph supplied for job {}", job.uuid),
            });
        }
        if let Some(missing) = self.nodes.iter().find(|t| !job.contains_task(**t)) {
            return Err(RegistryError::InconsistentGraph {
                job: self.job_id,
                reason: format!("task {missing} is not part of the job"),
            });
        }
        self.topological_order().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::TaskDescriptor;
    use crate::core::ids::IdGenerator;

    fn t(id: u64) -> TaskId {
        TaskId::new(id)
    }

    #[test]
    fn test_from_job_uses_spawn_and_data_edges() {
        let job_id = IdGenerator::new().new_job_id();
        let root = TaskDescriptor::new(t(1), job_id, "root")
            .with_child(TaskDescriptor::new(t(2), job_id, "left"))
            .with_child(TaskDescriptor::new(t(3), job_id, "right").with_dependency(t(2)));
        let job = JobDescriptor::new(job_id, "j", root);

        let graph = TaskGraph::from_job(&job);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.roots(), vec![t(1)]);
        assert_eq!(graph.predecessors(t(3)), vec![t(1), t(2)]);
        assert_eq!(graph.topological_order().unwrap(), vec![t(1), t(2), t(3)]);
        assert!(graph.validate_against(&job).is_ok());
    }

    #[test]
    fn test_cycle_is_inconsistent() {
        let job_id = IdGenerator::new().new_job_id();
        let mut graph = TaskGraph::new(job_id);
        graph.add_dependency(t(1), t(2));
        graph.add_dependency(t(2), t(3));
        graph.add_dependency(t(3), t(2));
        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, RegistryError::InconsistentGraph { job, .. } if job == job_id));
    }

    #[test]
    fn test_unknown_task_is_inconsistent() {
        let job_id = IdGenerator::new().new_job_id();
        let job = JobDescriptor::new(job_id, "j", TaskDescriptor::new(t(1), job_id, "only"));
        let mut graph = TaskGraph::new(job_id);
        graph.add_dependency(t(1), t(99));
        let err = graph.validate_against(&job).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("inconsistent task graph for job {job_id}: task 99 is not part of the job")
        );
    }

    #[test]
    fn test_graph_for_other_job_is_inconsistent() {
        let ids = IdGenerator::new();
        let job_id = ids.new_job_id();
        let job = JobDescriptor::new(job_id, "j", TaskDescriptor::new(t(1), job_id, "only"));
        let graph = TaskGraph::new(ids.new_job_id());
        assert!(graph.validate_against(&job).is_err());
    }
}
