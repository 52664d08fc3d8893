//! Identifier types and the process-wide identifier generator.
//!
//! Resource and job identifiers are random 128-bit UUIDs, so independent
//! processes can mint them without coordination. Task and task-output
//! identifiers are narrower and come from checked monotonic counters: running
//! out of space is reported as [`RegistryError::IdentifierExhausted`] rather
//! than wrapping around into a value that was already handed out.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{RegistryError, RegistryKey};

macro_rules! define_uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

macro_rules! define_counter_id {
    ($(#[$doc:meta])* $name:ident, $value:ty) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($value);

        impl $name {
            /// Wrap a raw value.
            #[must_use]
            pub const fn new(raw: $value) -> Self {
                Self(raw)
            }

            /// The raw value.
            #[must_use]
            pub const fn get(self) -> $value {
                self.0
            }
        }

        impl From<$value> for $name {
            fn from(raw: $value) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $value {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_uuid_id!(
    /// Globally unique identifier of a compute resource (machine, core, PU...).
    ResourceId
);
define_uuid_id!(
    /// Globally unique identifier of a submitted job.
    JobId
);
define_counter_id!(
    /// Identifier of a task, unique within the process and so within its job.
    TaskId,
    u64
);
define_counter_id!(
    /// Identifier of an output produced by a task, unique within that task.
    TaskOutputId,
    u32
);
define_counter_id!(
    /// Identifier the dispatcher assigns to each opened connection.
    ConnectionId,
    u64
);

/// The kinds of identifier the generator issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// [`ResourceId`].
    Resource,
    /// [`JobId`].
    Job,
    /// [`TaskId`].
    Task,
    /// [`TaskOutputId`].
    TaskOutput,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resource => "resource",
            Self::Job => "job",
            Self::Task => "task",
            Self::TaskOutput => "task output",
        };
        f.write_str(name)
    }
}

/// Issues every identifier kind. Shared by reference; all methods take `&self`.
#[derive(Debug)]
pub struct IdGenerator {
    next_task: AtomicU64,
    /// Next output id per task; `None` once the task is forgotten.
    next_output: Mutex<HashMap<TaskId, Option<u32>>>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    /// Create a generator. Task ids start at 1, task output ids at 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_task: AtomicU64::new(1),
            next_output: Mutex::new(HashMap::new()),
        }
    }

    /// A fresh random resource identifier.
    #[must_use]
    pub fn new_resource_id(&self) -> ResourceId {
        ResourceId(Uuid::new_v4())
    }

    /// A fresh random job identifier.
    #[must_use]
    pub fn new_job_id(&self) -> JobId {
        JobId(Uuid::new_v4())
    }

    /// Next task identifier for `job_id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::IdentifierExhausted`] once the 64-bit space is used up.
    pub fn new_task_id(&self, job_id: JobId) -> Result<TaskId, RegistryError> {
        let id = self
            .next_task
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1))
            .map(TaskId)
            .map_err(|_| RegistryError::IdentifierExhausted(IdKind::Task))?;
        tracing::trace!(job_id = %job_id, task_id = %id, "issued task id");
        Ok(id)
    }

    /// Next output identifier for `task_id`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::IdentifierExhausted`] once the task has used up the
    ///   32-bit space
    /// - [`RegistryError::NotFound`] after [`IdGenerator::forget_task`]
    pub fn new_task_output_id(&self, task_id: TaskId) -> Result<TaskOutputId, RegistryError> {
        let mut counters = self.next_output.lock();
        let next = counters
            .entry(task_id)
            .or_insert(Some(0))
            .as_mut()
            .ok_or(RegistryError::NotFound(RegistryKey::Task(task_id)))?;
        let issued = *next;
        *next = issued
            .checked_add(1)
            .ok_or(RegistryError::IdentifierExhausted(IdKind::TaskOutput))?;
        Ok(TaskOutputId(issued))
    }

    /// Retire a task that left the registry. Its output counter is replaced by
    /// a tombstone so no output id is issued for it again.
    pub fn forget_task(&self, task_id: TaskId) {
        self.next_output.lock().insert(task_id, None);
    }

    #[cfg(test)]
    fn starting_at(next_task: u64) -> Self {
        Self {
            next_task: AtomicU64::new(next_task),
            next_output: Mutex::new(HashMap::new()),
        }
    }
}
