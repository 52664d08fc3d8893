//! Cluster-wide registry: the identifier generator plus the four registries,
//! with the multi-registry operations scheduling logic needs.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::descriptor::{
    JobDescriptor, JobState, ResourceDescriptor, ResourceType, TaskState,
};
use crate::core::graph_registry::TaskGraphRegistry;
use crate::core::ids::{IdGenerator, JobId, ResourceId, TaskId};
use crate::core::job_registry::JobRegistry;
use crate::core::resource_registry::ResourceRegistry;
use crate::core::task_graph::TaskGraph;
use crate::core::task_registry::TaskRegistry;
use crate::core::RegistryError;

/// Owner of all registry state of one scheduler process.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct ClusterRegistry {
    ids: IdGenerator,
    resources: ResourceRegistry,
    jobs: JobRegistry,
    tasks: TaskRegistry,
    graphs: TaskGraphRegistry,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterRegistry {
    /// Empty registries and a fresh identifier generator.
    #[must_use]
    pub fn new() -> Self {
        let jobs = JobRegistry::new();
        Self {
            ids: IdGenerator::new(),
            resources: ResourceRegistry::new(),
            tasks: jobs.tasks(),
            graphs: jobs.graphs(),
            jobs,
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Identifier generator.
    #[must_use]
    pub const fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Resource Registry.
    #[must_use]
    pub const fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Job Registry.
    #[must_use]
    pub const fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Task Registry.
    #[must_use]
    pub const fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Task-Graph Registry.
    #[must_use]
    pub const fn graphs(&self) -> &TaskGraphRegistry {
        &self.graphs
    }

    /// Register a new resource with a fresh id; its counter starts at
    /// `task_capacity`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateKey`] if the generated id collides.
    pub fn register_resource(
        &self,
        friendly_name: impl Into<String>,
        resource_type: ResourceType,
        task_capacity: u64,
    ) -> Result<ResourceId, RegistryError> {
        let id = self.ids.new_resource_id();
        let descriptor = ResourceDescriptor::new(id, friendly_name, resource_type)
            .with_task_capacity(task_capacity);
        self.resources.put(id, descriptor, task_capacity)?;
        self.audit("resource", id, "register", None);
        Ok(id)
    }

    /// Remove a resource. Tasks placed on it keep their `scheduled_to` until
    /// they are evicted or completed.
    pub fn deregister_resource(&self, id: ResourceId) -> bool {
        let removed = self.resources.remove(id);
        if removed {
            self.audit("resource", id, "deregister", None);
        }
        removed
    }

    /// Admit a job: validate its graph (derived from the task tree when
    /// `graph` is `None`), then insert the job, its tasks and the graph in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InconsistentGraph`] if the graph does not match the job
    /// - [`RegistryError::DuplicateKey`] if the job or one of its tasks is
    ///   already registered
    pub fn admit_job(
        &self,
        mut descriptor: JobDescriptor,
        graph: Option<TaskGraph>,
    ) -> Result<JobId, RegistryError> {
        let job_id = descriptor.uuid;
        let graph = graph.unwrap_or_else(|| TaskGraph::from_job(&descriptor));
        graph.validate_against(&descriptor)?;
        if descriptor.state == JobState::New {
            descriptor.state = JobState::Created;
        }
        let tasks = descriptor.task_ids().len();
        self.jobs.admit(job_id, descriptor, graph)?;
        self.audit("job", job_id, "admit", Some(format!("{tasks} task(s)")));
        Ok(job_id)
    }

    /// Place a task on a resource: reserve one unit of the resource's
    /// capacity and mark the task assigned to it. A task already placed
    /// elsewhere moves and its old unit is released. Returns the remaining
    /// capacity.
    ///
    /// The placement is decided under the job's write lock after the unit is
    /// reserved, so concurrent placements of one task hold at most one unit.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if the task or resource is unknown
    /// - [`RegistryError::CounterOutOfRange`] if the resource has no capacity left
    pub fn place_task(
        &self,
        task_id: TaskId,
        resource_id: ResourceId,
    ) -> Result<u64, RegistryError> {
        let task_ref = self.tasks.get(task_id)?;
        if task_ref.with(|t| t.scheduled_to)? == Some(resource_id) {
            return self.resources.counter(resource_id);
        }

        let remaining = self.resources.update_counter(resource_id, -1)?;
        let previous = match task_ref.update(|t| {
            let previous = t.scheduled_to.replace(resource_id);
            t.state = TaskState::Assigned;
            previous
        }) {
            Ok(previous) => previous,
            Err(e) => {
                // The job went away between lookup and assignment.
                self.release(resource_id);
                return Err(e);
            }
        };

        match previous {
            Some(same) if same == resource_id => {
                // A concurrent placement got there first; hand back our unit.
                debug!(task_id = %task_id, resource_id = %resource_id, "task already placed");
                Ok(self.release(resource_id).unwrap_or(remaining))
            }
            Some(other) => {
                self.release(other);
                info!(
                    task_id = %task_id,
                    from = %other,
                    to = %resource_id,
                    remaining,
                    "task moved"
                );
                self.audit("task", task_id, "evict", Some(other.to_string()));
                self.audit("task", task_id, "place", Some(resource_id.to_string()));
                Ok(remaining)
            }
            None => {
                info!(task_id = %task_id, resource_id = %resource_id, remaining, "task placed");
                self.audit("task", task_id, "place", Some(resource_id.to_string()));
                Ok(remaining)
            }
        }
    }

    /// Take a task off its resource and release the capacity it held.
    /// Returns the resource it was placed on, if any.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the task is not registered.
    pub fn evict_task(&self, task_id: TaskId) -> Result<Option<ResourceId>, RegistryError> {
        let previous = self.tasks.get(task_id)?.update(|t| {
            let previous = t.scheduled_to.take();
            if previous.is_some() && !t.state.is_terminal() {
                t.state = TaskState::Runnable;
            }
            previous
        })?;
        if let Some(resource_id) = previous {
            self.release(resource_id);
            self.audit("task", task_id, "evict", Some(resource_id.to_string()));
        }
        Ok(previous)
    }

    /// Move a task to a terminal state and release its placement.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the task is not registered.
    pub fn complete_task(&self, task_id: TaskId, state: TaskState) -> Result<(), RegistryError> {
        let previous = self.tasks.get(task_id)?.update(|t| {
            t.state = state;
            t.scheduled_to.take()
        })?;
        if let Some(resource_id) = previous {
            self.release(resource_id);
        }
        self.audit("task", task_id, "complete", Some(format!("{state:?}")));
        Ok(())
    }

    /// Remove a job with its tasks and graph, release the capacity its placed
    /// tasks held and drop their output counters.
    pub fn remove_job(&self, job_id: JobId) -> bool {
        let Ok(descriptor) = self.jobs.take(job_id) else {
            return false;
        };
        for task in descriptor.tasks() {
            if let Some(resource_id) = task.scheduled_to {
                self.release(resource_id);
            }
            self.ids.forget_task(task.uid);
        }
        self.audit("job", job_id, "remove", None);
        true
    }

    /// Give one unit back to a resource. Returns the new counter, or `None`
    /// if the resource is gone or already at its maximum.
    fn release(&self, resource_id: ResourceId) -> Option<u64> {
        match self.resources.update_counter(resource_id, 1) {
            Ok(counter) => Some(counter),
            Err(e) if e.is_not_found() => {
                info!(resource_id = %resource_id, "released capacity of a deregistered resource");
                None
            }
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "could not release capacity");
                None
            }
        }
    }

    fn audit(&self, entity: &str, entity_id: impl ToString, action: &str, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_audit_event(entity, entity_id, action, detail));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::InMemoryAuditSink;
    use crate::core::descriptor::TaskDescriptor;

    fn two_task_job(cluster: &ClusterRegistry) -> (JobDescriptor, TaskId, TaskId) {
        let ids = cluster.ids();
        let job_id = ids.new_job_id();
        let t1 = ids.new_task_id(job_id).unwrap();
        let t2 = ids.new_task_id(job_id).unwrap();
        let root = TaskDescriptor::new(t1, job_id, "t1")
            .with_child(TaskDescriptor::new(t2, job_id, "t2"));
        (JobDescriptor::new(job_id, "j", root), t1, t2)
    }

    #[test]
    fn test_admit_sets_created_state() {
        let cluster = ClusterRegistry::new();
        let (job, _, _) = two_task_job(&cluster);
        let job_id = cluster.admit_job(job, None).unwrap();
        assert_eq!(cluster.jobs().get(job_id).unwrap().state, JobState::Created);
        assert_eq!(cluster.graphs().get(job_id).unwrap().edge_count(), 1);
    }

    #[test]
    fn test_admit_rejects_inconsistent_graph() {
        let cluster = ClusterRegistry::new();
        let (job, t1, _) = two_task_job(&cluster);
        let mut graph = TaskGraph::new(job.uuid);
        graph.add_dependency(t1, TaskId::new(u64::MAX));
        let job_id = job.uuid;
        assert!(matches!(
            cluster.admit_job(job, Some(graph)),
            Err(RegistryError::InconsistentGraph { .. })
        ));
        assert!(!cluster.jobs().contains(job_id));
        assert!(cluster.tasks().is_empty());
    }

    #[test]
    fn test_place_evict_round_trip() {
        let cluster = ClusterRegistry::new();
        let resource = cluster.register_resource("m0", ResourceType::Machine, 2).unwrap();
        let (job, t1, t2) = two_task_job(&cluster);
        cluster.admit_job(job, None).unwrap();

        assert_eq!(cluster.place_task(t1, resource).unwrap(), 1);
        assert_eq!(cluster.place_task(t1, resource).unwrap(), 1);
        assert_eq!(cluster.place_task(t2, resource).unwrap(), 0);
        assert_eq!(
            cluster.tasks().get(t2).unwrap().with(|t| t.state).unwrap(),
            TaskState::Assigned
        );

        assert_eq!(cluster.evict_task(t1).unwrap(), Some(resource));
        assert_eq!(cluster.evict_task(t1).unwrap(), None);
        assert_eq!(cluster.resources().counter(resource).unwrap(), 1);
    }

    #[test]
    fn test_place_fails_without_capacity() {
        let cluster = ClusterRegistry::new();
        let resource = cluster.register_resource("core", ResourceType::Core, 1).unwrap();
        let (job, t1, t2) = two_task_job(&cluster);
        cluster.admit_job(job, None).unwrap();

        cluster.place_task(t1, resource).unwrap();
        assert!(matches!(
            cluster.place_task(t2, resource),
            Err(RegistryError::CounterOutOfRange { current: 0, .. })
        ));
        assert_eq!(cluster.tasks().get(t2).unwrap().with(|t| t.scheduled_to).unwrap(), None);
    }

    #[test]
    fn test_remove_job_releases_capacity() {
        let sink = Arc::new(InMemoryAuditSink::new(64));
        let cluster = ClusterRegistry::new().with_audit(sink.clone());
        let resource = cluster.register_resource("m0", ResourceType::Machine, 4).unwrap();
        let (job, t1, t2) = two_task_job(&cluster);
        let job_id = cluster.admit_job(job, None).unwrap();
        cluster.place_task(t1, resource).unwrap();
        cluster.place_task(t2, resource).unwrap();
        assert_eq!(cluster.resources().counter(resource).unwrap(), 2);

        assert!(cluster.remove_job(job_id));
        assert_eq!(cluster.resources().counter(resource).unwrap(), 4);
        assert!(!cluster.remove_job(job_id));
        assert_eq!(sink.events_with_action("place").len(), 2);
        assert_eq!(sink.events_with_action("remove").len(), 1);
    }

    #[test]
    fn test_complete_task_releases_placement() {
        let cluster = ClusterRegistry::new();
        let resource = cluster.register_resource("m0", ResourceType::Machine, 1).unwrap();
        let (job, t1, _) = two_task_job(&cluster);
        cluster.admit_job(job, None).unwrap();
        cluster.place_task(t1, resource).unwrap();

        cluster.complete_task(t1, TaskState::Completed).unwrap();
        assert_eq!(cluster.resources().counter(resource).unwrap(), 1);
        let task = cluster.tasks().get(t1).unwrap().snapshot().unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.scheduled_to, None);
    }
}
