//! Error types for registry operations.

use std::fmt;

use thiserror::Error;

use crate::core::ids::{ConnectionId, IdKind, JobId, ResourceId, TaskId};

/// The key a registry operation was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKey {
    /// Resource Registry entry.
    Resource(ResourceId),
    /// Job Registry entry.
    Job(JobId),
    /// Task Registry entry.
    Task(TaskId),
    /// Task-Graph Registry entry, keyed by its job.
    TaskGraph(JobId),
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "resource {id}"),
            Self::Job(id) => write!(f, "job {id}"),
            Self::Task(id) => write!(f, "task {id}"),
            Self::TaskGraph(id) => write!(f, "task graph of job {id}"),
        }
    }
}

/// Errors produced by registry and dispatch components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Lookup, update or removal addressed a key that is not present.
    #[error("{0} not found")]
    NotFound(RegistryKey),
    /// Insertion addressed a key that is already present.
    #[error("{0} already registered")]
    DuplicateKey(RegistryKey),
    /// A bounded identifier space has no values left.
    #[error("{0} identifier space exhausted")]
    IdentifierExhausted(IdKind),
    /// A counter update would take a resource counter below zero or past `u64::MAX`.
    #[error("counter of resource {id} cannot move by {delta} from {current}")]
    CounterOutOfRange {
        /// Resource whose counter was addressed.
        id: ResourceId,
        /// Counter value before the rejected update.
        current: u64,
        /// Requested change.
        delta: i64,
    },
    /// A message or error handler failed while processing an event.
    #[error("dispatch failure on connection {connection} ({endpoint}): {reason}")]
    DispatchFailure {
        /// Connection the event arrived on.
        connection: ConnectionId,
        /// Remote endpoint of that connection.
        endpoint: String,
        /// Handler error or panic message.
        reason: String,
    },
    /// A task graph does not match the tasks of its job.
    #[error("inconsistent task graph for job {job}: {reason}")]
    InconsistentGraph {
        /// Job the graph belongs to.
        job: JobId,
        /// What is wrong with it.
        reason: String,
    },
}

impl RegistryError {
    /// Whether this is a [`RegistryError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Application-facing result using anyhow for handler bodies and builders.
pub type AppResult<T> = Result<T, anyhow::Error>;
