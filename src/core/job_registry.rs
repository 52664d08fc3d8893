//! Job Registry and the tables it shares with the Task and Task-Graph registries.
//!
//! The three registries are views over one [`JobTables`] value behind a single
//! `parking_lot::RwLock`. Structural changes (insert, remove, cascade) take the
//! write lock, so removing a job together with its task and graph entries is
//! one transaction to every reader. Each job's descriptor sits in its own
//! [`JobSlot`] with its own lock, so mutating one job does not block readers or
//! writers of another.
//!
//! Lock order is always tables, then slot. Closures handed to
//! [`JobRegistry::with_job`] and [`JobRegistry::update`] run with only the slot
//! lock held.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::core::descriptor::JobDescriptor;
use crate::core::graph_registry::TaskGraphRegistry;
use crate::core::ids::{JobId, TaskId};
use crate::core::task_graph::TaskGraph;
use crate::core::task_registry::{TaskRef, TaskRegistry};
use crate::core::{RegistryError, RegistryKey};

/// Storage for one job's descriptor.
#[derive(Debug)]
pub(crate) struct JobSlot {
    pub(crate) job_id: JobId,
    pub(crate) descriptor: RwLock<JobDescriptor>,
    removed: AtomicBool,
}

impl JobSlot {
    fn new(job_id: JobId, descriptor: JobDescriptor) -> Self {
        Self {
            job_id,
            descriptor: RwLock::new(descriptor),
            removed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

/// Tables shared by the job, task and task-graph registries.
#[derive(Debug, Default)]
pub(crate) struct JobTables {
    pub(crate) jobs: HashMap<JobId, Arc<JobSlot>>,
    pub(crate) tasks: HashMap<TaskId, TaskRef>,
    pub(crate) tasks_by_job: HashMap<JobId, HashSet<TaskId>>,
    pub(crate) graphs: HashMap<JobId, Arc<TaskGraph>>,
}

pub(crate) type SharedJobTables = Arc<RwLock<JobTables>>;

impl JobTables {
    fn insert_job(
        &mut self,
        job_id: JobId,
        descriptor: JobDescriptor,
    ) -> Result<Arc<JobSlot>, RegistryError> {
        if self.jobs.contains_key(&job_id) {
            return Err(RegistryError::DuplicateKey(RegistryKey::Job(job_id)));
        }
        if let Some(dup) = descriptor.duplicate_task_id() {
            return Err(RegistryError::DuplicateKey(RegistryKey::Task(dup)));
        }
        let slot = Arc::new(JobSlot::new(job_id, descriptor));
        self.jobs.insert(job_id, Arc::clone(&slot));
        Ok(slot)
    }

    pub(crate) fn insert_task(&mut self, task_ref: TaskRef) {
        self.tasks_by_job
            .entry(task_ref.job_id())
            .or_default()
            .insert(task_ref.task_id());
        self.tasks.insert(task_ref.task_id(), task_ref);
    }

    pub(crate) fn remove_task(&mut self, task_id: TaskId) -> Option<TaskRef> {
        let task_ref = self.tasks.remove(&task_id)?;
        if let Some(siblings) = self.tasks_by_job.get_mut(&task_ref.job_id()) {
            siblings.remove(&task_id);
            if siblings.is_empty() {
                self.tasks_by_job.remove(&task_ref.job_id());
            }
        }
        Some(task_ref)
    }

    pub(crate) fn remove_tasks_for_job(&mut self, job_id: JobId) -> usize {
        let Some(task_ids) = self.tasks_by_job.remove(&job_id) else {
            return 0;
        };
        for task_id in &task_ids {
            self.tasks.remove(task_id);
        }
        task_ids.len()
    }

    /// Remove a job with its task entries and graph. The slot is marked removed
    /// under its descriptor write lock, before the caller releases the tables
    /// write lock: a writer that already looked the slot up either finishes
    /// first or sees the flag.
    fn remove_job(&mut self, job_id: JobId) -> Option<Arc<JobSlot>> {
        let slot = self.jobs.remove(&job_id)?;
        {
            let _descriptor = slot.descriptor.write();
            slot.mark_removed();
        }
        let tasks = self.remove_tasks_for_job(job_id);
        let graph = self.graphs.remove(&job_id).is_some();
        debug!(job_id = %job_id, tasks, graph, "cascaded job removal");
        Some(slot)
    }

    pub(crate) fn live_slot(&self, job_id: JobId) -> Result<&Arc<JobSlot>, RegistryError> {
        self.jobs
            .get(&job_id)
            .ok_or(RegistryError::NotFound(RegistryKey::Job(job_id)))
    }
}

/// Registry of admitted jobs, keyed by [`JobId`]. The registry is the sole
/// owner of each [`JobDescriptor`] and of the tasks embedded in it.
///
/// Cloning yields another handle onto the same tables.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    tables: SharedJobTables,
}

impl JobRegistry {
    /// An empty registry with fresh tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Task Registry sharing this registry's tables.
    #[must_use]
    pub fn tasks(&self) -> TaskRegistry {
        TaskRegistry::from_tables(Arc::clone(&self.tables))
    }

    /// Task-Graph Registry sharing this registry's tables.
    #[must_use]
    pub fn graphs(&self) -> TaskGraphRegistry {
        TaskGraphRegistry::from_tables(Arc::clone(&self.tables))
    }

    /// Insert a job. Its tasks are not indexed; see [`JobRegistry::admit`].
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateKey`] if the job is already registered or its
    /// task tree repeats a task id.
    pub fn put(&self, job_id: JobId, descriptor: JobDescriptor) -> Result<(), RegistryError> {
        self.tables.write().insert_job(job_id, descriptor)?;
        info!(job_id = %job_id, "job registered");
        Ok(())
    }

    /// Insert a job, index every task of its tree in the Task Registry and
    /// attach `graph`, as one transaction.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateKey`] if the job or any of its tasks is
    /// already registered; nothing is inserted in that case.
    pub fn admit(
        &self,
        job_id: JobId,
        descriptor: JobDescriptor,
        graph: TaskGraph,
    ) -> Result<(), RegistryError> {
        let task_ids = descriptor.task_ids();
        let mut tables = self.tables.write();
        if tables.jobs.contains_key(&job_id) {
            return Err(RegistryError::DuplicateKey(RegistryKey::Job(job_id)));
        }
        if let Some(taken) = task_ids.iter().find(|t| tables.tasks.contains_key(*t)) {
            return Err(RegistryError::DuplicateKey(RegistryKey::Task(*taken)));
        }
        let slot = tables.insert_job(job_id, descriptor)?;
        for task_id in &task_ids {
            tables.insert_task(TaskRef::new(&slot, *task_id));
        }
        tables.graphs.insert(job_id, Arc::new(graph));
        drop(tables);

        info!(job_id = %job_id, tasks = task_ids.len(), "job admitted");
        Ok(())
    }

    /// Snapshot of a job's descriptor.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job is not registered.
    pub fn get(&self, job_id: JobId) -> Result<JobDescriptor, RegistryError> {
        self.with_job(job_id, Clone::clone)
    }

    /// Run `f` against a job's descriptor under its read lock.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job is not registered.
    pub fn with_job<R>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&JobDescriptor) -> R,
    ) -> Result<R, RegistryError> {
        let slot = self.slot(job_id)?;
        let descriptor = slot.descriptor.read();
        if slot.is_removed() {
            return Err(RegistryError::NotFound(RegistryKey::Job(job_id)));
        }
        Ok(f(&descriptor))
    }

    /// Run `f` against a job's descriptor under its write lock.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job is not registered.
    pub fn update<R>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut JobDescriptor) -> R,
    ) -> Result<R, RegistryError> {
        let slot = self.slot(job_id)?;
        let mut descriptor = slot.descriptor.write();
        if slot.is_removed() {
            return Err(RegistryError::NotFound(RegistryKey::Job(job_id)));
        }
        Ok(f(&mut descriptor))
    }

    /// Remove a job together with its task entries and task graph.
    /// Returns `false` if the job was not registered.
    pub fn remove(&self, job_id: JobId) -> bool {
        self.take(job_id).is_ok()
    }

    /// Like [`JobRegistry::remove`], returning the removed descriptor.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job is not registered.
    pub fn take(&self, job_id: JobId) -> Result<JobDescriptor, RegistryError> {
        let slot = self
            .tables
            .write()
            .remove_job(job_id)
            .ok_or(RegistryError::NotFound(RegistryKey::Job(job_id)))?;
        info!(job_id = %job_id, "job removed");
        let descriptor = slot.descriptor.read().clone();
        Ok(descriptor)
    }

    /// A non-owning reference to task `task_id` of job `job_id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job is not registered or does not
    /// contain the task.
    pub fn task_ref(&self, job_id: JobId, task_id: TaskId) -> Result<TaskRef, RegistryError> {
        let slot = self.slot(job_id)?;
        if !slot.descriptor.read().contains_task(task_id) {
            return Err(RegistryError::NotFound(RegistryKey::Task(task_id)));
        }
        Ok(TaskRef::new(&slot, task_id))
    }

    /// Whether the job is registered.
    #[must_use]
    pub fn contains(&self, job_id: JobId) -> bool {
        self.tables.read().jobs.contains_key(&job_id)
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().jobs.len()
    }

    /// Whether no job is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of all registered jobs.
    #[must_use]
    pub fn job_ids(&self) -> Vec<JobId> {
        self.tables.read().jobs.keys().copied().collect()
    }

    fn slot(&self, job_id: JobId) -> Result<Arc<JobSlot>, RegistryError> {
        self.tables.read().live_slot(job_id).map(Arc::clone)
    }
}
