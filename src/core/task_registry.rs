//! Task Registry: task id to a non-owning reference into the owning job.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::core::descriptor::TaskDescriptor;
use crate::core::ids::{JobId, TaskId};
use crate::core::job_registry::{JobSlot, SharedJobTables};
use crate::core::{RegistryError, RegistryKey};

/// Non-owning reference to a task inside its job's descriptor.
///
/// Holding a `TaskRef` does not keep the job registered. Every access checks
/// that the job is still live and still contains the task, and fails with
/// [`RegistryError::NotFound`] otherwise.
#[derive(Debug, Clone)]
pub struct TaskRef {
    job_id: JobId,
    task_id: TaskId,
    job: Weak<JobSlot>,
}

impl TaskRef {
    pub(crate) fn new(slot: &Arc<JobSlot>, task_id: TaskId) -> Self {
        Self {
            job_id: slot.job_id,
            task_id,
            job: Arc::downgrade(slot),
        }
    }

    /// Owning job.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Referenced task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Whether the owning job is still registered.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.slot().is_ok()
    }

    /// Run `f` against the task under the job's read lock.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job was removed or no longer
    /// contains the task.
    pub fn with<R>(&self, f: impl FnOnce(&TaskDescriptor) -> R) -> Result<R, RegistryError> {
        let slot = self.slot()?;
        let descriptor = slot.descriptor.read();
        // Removal flips the flag under the write lock; re-check once held.
        if slot.is_removed() {
            return Err(self.not_found());
        }
        descriptor
            .find_task(self.task_id)
            .map(f)
            .ok_or_else(|| self.not_found())
    }

    /// Run `f` against the task under the job's write lock.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job was removed or no longer
    /// contains the task.
    pub fn update<R>(&self, f: impl FnOnce(&mut TaskDescriptor) -> R) -> Result<R, RegistryError> {
        let slot = self.slot()?;
        let mut descriptor = slot.descriptor.write();
        if slot.is_removed() {
            return Err(self.not_found());
        }
        descriptor
            .find_task_mut(self.task_id)
            .map(f)
            .ok_or_else(|| self.not_found())
    }

    /// Copy of the task descriptor.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job was removed or no longer
    /// contains the task.
    pub fn snapshot(&self) -> Result<TaskDescriptor, RegistryError> {
        self.with(Clone::clone)
    }

    fn slot(&self) -> Result<Arc<JobSlot>, RegistryError> {
        self.job
            .upgrade()
            .filter(|slot| !slot.is_removed())
            .ok_or_else(|| self.not_found())
    }

    const fn not_found(&self) -> RegistryError {
        RegistryError::NotFound(RegistryKey::Task(self.task_id))
    }

    fn points_to(&self, slot: &Arc<JobSlot>) -> bool {
        Weak::ptr_eq(&self.job, &Arc::downgrade(slot))
    }
}

/// Registry of tasks, keyed by [`TaskId`].
///
/// Obtained from [`crate::core::JobRegistry::tasks`]; entries never outlive
/// the job that owns the task.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    tables: SharedJobTables,
}

impl TaskRegistry {
    pub(crate) const fn from_tables(tables: SharedJobTables) -> Self {
        Self { tables }
    }

    /// Register `task_ref` under `task_id`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if the referenced job is no longer
    ///   registered or does not contain `task_id`
    /// - [`RegistryError::DuplicateKey`] if `task_id` is already registered
    pub fn put(&self, task_id: TaskId, task_ref: TaskRef) -> Result<(), RegistryError> {
        let mut tables = self.tables.write();
        if task_ref.task_id() != task_id {
            return Err(RegistryError::NotFound(RegistryKey::Task(task_id)));
        }
        {
            let slot = tables.live_slot(task_ref.job_id())?;
            if !task_ref.points_to(slot) || !slot.descriptor.read().contains_task(task_id) {
                return Err(RegistryError::NotFound(RegistryKey::Task(task_id)));
            }
        }
        if tables.tasks.contains_key(&task_id) {
            return Err(RegistryError::DuplicateKey(RegistryKey::Task(task_id)));
        }
        tables.insert_task(task_ref);
        drop(tables);
        debug!(task_id = %task_id, "task registered");
        Ok(())
    }

    /// Reference to a registered task.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the task is not registered.
    pub fn get(&self, task_id: TaskId) -> Result<TaskRef, RegistryError> {
        self.tables
            .read()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(RegistryError::NotFound(RegistryKey::Task(task_id)))
    }

    /// Unregister a task. The task stays in its job's descriptor.
    pub fn remove(&self, task_id: TaskId) -> bool {
        self.tables.write().remove_task(task_id).is_some()
    }

    /// Unregister every task of `job_id`; returns how many were removed.
    pub fn remove_all_for_job(&self, job_id: JobId) -> usize {
        let removed = self.tables.write().remove_tasks_for_job(job_id);
        debug!(job_id = %job_id, removed, "unregistered tasks of job");
        removed
    }

    /// Registered tasks of `job_id`, in ascending id order.
    #[must_use]
    pub fn tasks_for_job(&self, job_id: JobId) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tables
            .read()
            .tasks_by_job
            .get(&job_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Whether the task is registered.
    #[must_use]
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tables.read().tasks.contains_key(&task_id)
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().tasks.len()
    }

    /// Whether no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
