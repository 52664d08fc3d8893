//! Resource, job and task descriptors.
//!
//! Tasks live inside their job: a [`JobDescriptor`] owns a tree of
//! [`TaskDescriptor`]s rooted at `root_task`, and every other structure refers
//! to a task by `(JobId, TaskId)`.

use serde::{Deserialize, Serialize};

use crate::core::ids::{JobId, ResourceId, TaskId, TaskOutputId};

/// Kind of compute entity a resource represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Cluster coordinator.
    Coordinator,
    /// Physical or virtual machine.
    Machine,
    /// NUMA node inside a machine.
    NumaNode,
    /// CPU socket.
    Socket,
    /// CPU core.
    Core,
    /// Processing unit (hardware thread).
    Pu,
    /// Logical grouping without a physical counterpart.
    Logical,
}

/// Liveness of a resource as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Not yet observed.
    Unknown,
    /// Available for placement.
    Idle,
    /// Running at least one task.
    Busy,
    /// Stopped responding.
    Lost,
}

/// Description of a compute resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource identifier.
    pub uuid: ResourceId,
    /// Human-readable name.
    pub friendly_name: String,
    /// Kind of resource.
    pub resource_type: ResourceType,
    /// Last observed state.
    pub state: ResourceState,
    /// Enclosing resource, if any.
    pub parent: Option<ResourceId>,
    /// Number of tasks this resource can run at once.
    pub task_capacity: u64,
}

impl ResourceDescriptor {
    /// An idle resource with capacity for one task and no parent.
    pub fn new(
        uuid: ResourceId,
        friendly_name: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            uuid,
            friendly_name: friendly_name.into(),
            resource_type,
            state: ResourceState::Idle,
            parent: None,
            task_capacity: 1,
        }
    }

    /// Set the enclosing resource.
    #[must_use]
    pub const fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the task capacity.
    #[must_use]
    pub const fn with_task_capacity(mut self, task_capacity: u64) -> Self {
        self.task_capacity = task_capacity;
        self
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, not yet admitted.
    New,
    /// Admitted to the registry.
    Created,
    /// At least one task is running.
    Running,
    /// All tasks completed.
    Completed,
    /// A task failed.
    Failed,
    /// Cancelled.
    Aborted,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Known but not yet considered for scheduling.
    Created,
    /// Waiting on an upstream output.
    Blocking,
    /// Ready to be placed.
    Runnable,
    /// Placed on a resource, not yet started.
    Assigned,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled.
    Aborted,
}

impl TaskState {
    /// Whether the task will not run again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Description of a task, embedded in its job's task tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Task identifier.
    pub uid: TaskId,
    /// Human-readable name.
    pub name: String,
    /// Owning job.
    pub job_id: JobId,
    /// Lifecycle state.
    pub state: TaskState,
    /// Resource the task is placed on.
    pub scheduled_to: Option<ResourceId>,
    /// Tasks whose outputs this task consumes.
    pub dependencies: Vec<TaskId>,
    /// Outputs this task produces.
    pub outputs: Vec<TaskOutputId>,
    /// Child tasks spawned by this task.
    pub spawned: Vec<TaskDescriptor>,
}

impl TaskDescriptor {
    /// A runnable task with no dependencies, outputs or children.
    pub fn new(uid: TaskId, job_id: JobId, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            job_id,
            state: TaskState::Runnable,
            scheduled_to: None,
            dependencies: Vec::new(),
            outputs: Vec::new(),
            spawned: Vec::new(),
        }
    }

    /// Append a child task.
    pub fn spawn(&mut self, child: Self) -> &mut Self {
        self.spawned.push(child);
        self
    }

    /// Builder form of [`TaskDescriptor::spawn`].
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.spawned.push(child);
        self
    }

    /// Record a data dependency on `upstream`.
    #[must_use]
    pub fn with_dependency(mut self, upstream: TaskId) -> Self {
        self.dependencies.push(upstream);
        self
    }

    /// This task and all its descendants, depth-first, parents first.
    #[must_use]
    pub fn descendants(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(task) = stack.pop() {
            out.push(task);
            stack.extend(task.spawned.iter().rev());
        }
        out
    }

    fn find(&self, uid: TaskId) -> Option<&Self> {
        if self.uid == uid {
            return Some(self);
        }
        self.spawned.iter().find_map(|child| child.find(uid))
    }

    fn find_mut(&mut self, uid: TaskId) -> Option<&mut Self> {
        if self.uid == uid {
            return Some(self);
        }
        self.spawned.iter_mut().find_map(|child| child.find_mut(uid))
    }
}

/// Description of a job and, through `root_task`, all of its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Job identifier.
    pub uuid: JobId,
    /// Human-readable name.
    pub name: String,
    /// Lifecycle state.
    pub state: JobState,
    /// Root of the task tree.
    pub root_task: TaskDescriptor,
}

impl JobDescriptor {
    /// A newly submitted job.
    pub fn new(uuid: JobId, name: impl Into<String>, root_task: TaskDescriptor) -> Self {
        Self {
            uuid,
            name: name.into(),
            state: JobState::New,
            root_task,
        }
    }

    /// Every task of the job, depth-first from the root.
    #[must_use]
    pub fn tasks(&self) -> Vec<&TaskDescriptor> {
        self.root_task.descendants()
    }

    /// Identifiers of every task of the job.
    #[must_use]
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks().into_iter().map(|t| t.uid).collect()
    }

    /// Look up a task by identifier.
    #[must_use]
    pub fn find_task(&self, uid: TaskId) -> Option<&TaskDescriptor> {
        self.root_task.find(uid)
    }

    /// Look up a task by identifier for mutation.
    pub fn find_task_mut(&mut self, uid: TaskId) -> Option<&mut TaskDescriptor> {
        self.root_task.find_mut(uid)
    }

    /// Whether the job contains `uid`.
    #[must_use]
    pub fn contains_task(&self, uid: TaskId) -> bool {
        self.find_task(uid).is_some()
    }

    /// First task uid that appears more than once in the tree.
    #[must_use]
    pub fn duplicate_task_id(&self) -> Option<TaskId> {
        let mut seen = std::collections::HashSet::new();
        self.task_ids().into_iter().find(|id| !seen.insert(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::IdGenerator;

    fn sample_job() -> JobDescriptor {
        let ids = IdGenerator::new();
        let job_id = ids.new_job_id();
        let root = TaskDescriptor::new(TaskId::new(1), job_id, "root")
            .with_child(
                TaskDescriptor::new(TaskId::new(2), job_id, "map")
                    .with_child(TaskDescriptor::new(TaskId::new(3), job_id, "combine")),
            )
            .with_child(TaskDescriptor::new(TaskId::new(4), job_id, "reduce"));
        JobDescriptor::new(job_id, "wordcount", root)
    }

    #[test]
    fn test_tasks_are_listed_parents_first() {
        let job = sample_job();
        let ids: Vec<u64> = job.task_ids().into_iter().map(TaskId::get).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_find_task_mut_reaches_nested_task() {
        let mut job = sample_job();
        job.find_task_mut(TaskId::new(3)).unwrap().state = TaskState::Running;
        assert_eq!(job.find_task(TaskId::new(3)).unwrap().state, TaskState::Running);
        assert!(job.find_task(TaskId::new(9)).is_none());
    }

    #[test]
    fn test_duplicate_task_id_detected() {
        let mut job = sample_job();
        assert_eq!(job.duplicate_task_id(), None);
        let dup = TaskDescriptor::new(TaskId::new(2), job.uuid, "again");
        job.root_task.spawn(dup);
        assert_eq!(job.duplicate_task_id(), Some(TaskId::new(2)));
    }

    #[test]
    fn test_descriptor_serializes_with_snake_case_states() {
        let job = sample_job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["state"], "new");
        assert_eq!(json["root_task"]["state"], "runnable");
    }
}
