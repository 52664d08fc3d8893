//! Task-Graph Registry: job id to that job's task dependency graph.

use std::sync::Arc;

use tracing::debug;

use crate::core::ids::JobId;
use crate::core::job_registry::SharedJobTables;
use crate::core::task_graph::TaskGraph;
use crate::core::{RegistryError, RegistryKey};

/// Registry of task graphs, keyed by the owning [`JobId`].
///
/// Graphs are immutable once stored; [`TaskGraphRegistry::get`] hands out a
/// shared snapshot that stays valid even if the entry is later replaced or
/// removed. Structural validity is the producer's job
/// (see [`TaskGraph::validate_against`]).
#[derive(Debug, Clone)]
pub struct TaskGraphRegistry {
    tables: SharedJobTables,
}

impl TaskGraphRegistry {
    pub(crate) const fn from_tables(tables: SharedJobTables) -> Self {
        Self { tables }
    }

    /// Attach `graph` to a registered job.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if the job is not registered
    /// - [`RegistryError::DuplicateKey`] if the job already has a graph
    pub fn put(&self, job_id: JobId, graph: TaskGraph) -> Result<(), RegistryError> {
        let mut tables = self.tables.write();
        tables.live_slot(job_id)?;
        if tables.graphs.contains_key(&job_id) {
            return Err(RegistryError::DuplicateKey(RegistryKey::TaskGraph(job_id)));
        }
        let nodes = graph.len();
        tables.graphs.insert(job_id, Arc::new(graph));
        drop(tables);
        debug!(job_id = %job_id, nodes, "task graph registered");
        Ok(())
    }

    /// Swap the graph of a job, returning the previous one.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job has no graph.
    pub fn replace(
        &self,
        job_id: JobId,
        graph: TaskGraph,
    ) -> Result<Arc<TaskGraph>, RegistryError> {
        let mut tables = self.tables.write();
        let slot = tables
            .graphs
            .get_mut(&job_id)
            .ok_or(RegistryError::NotFound(RegistryKey::TaskGraph(job_id)))?;
        Ok(std::mem::replace(slot, Arc::new(graph)))
    }

    /// The graph of a job.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the job has no graph.
    pub fn get(&self, job_id: JobId) -> Result<Arc<TaskGraph>, RegistryError> {
        self.tables
            .read()
            .graphs
            .get(&job_id)
            .cloned()
            .ok_or(RegistryError::NotFound(RegistryKey::TaskGraph(job_id)))
    }

    /// Detach the graph of a job; the job itself stays registered.
    pub fn remove(&self, job_id: JobId) -> bool {
        self.tables.write().graphs.remove(&job_id).is_some()
    }

    /// Number of stored graphs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().graphs.len()
    }

    /// Whether no graph is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
