//! # Cluster Registry
//!
//! In-memory registry core for a cluster scheduler.
//!
//! The scheduler tracks the machines it can place work on, the jobs submitted
//! to it and the tasks those jobs consist of. This crate holds that state and
//! keeps it consistent while many threads read and mutate it at once.
//!
//! ## Components
//!
//! - **Identifier generator**: 128-bit random ids for resources and jobs,
//!   monotonic 64-bit task ids and per-task 32-bit output ids
//! - **Resource registry**: resource descriptors plus an atomic capacity
//!   counter per resource
//! - **Job, task and task-graph registries**: removing a job removes its task
//!   entries and graph in the same step; task entries point back into the
//!   job's descriptor and never outlive it
//! - **Cluster registry**: placement, eviction and job removal across
//!   registries, with an optional audit trail
//! - **Dispatcher**: delivers inbound messages and connection failures to
//!   async handlers on dedicated shard threads, FIFO per connection
//!
//! ```rust,ignore
//! use cluster_registry::core::{ClusterRegistry, JobDescriptor, ResourceType, TaskDescriptor};
//!
//! let cluster = ClusterRegistry::new();
//! let machine = cluster.register_resource("worker-1", ResourceType::Machine, 4)?;
//!
//! let job_id = cluster.ids().new_job_id();
//! let task_id = cluster.ids().new_task_id(job_id)?;
//! let root = TaskDescriptor::new(task_id, job_id, "map");
//! cluster.admit_job(JobDescriptor::new(job_id, "wordcount", root), None)?;
//!
//! let remaining = cluster.place_task(task_id, machine)?;
//! cluster.remove_job(job_id);
//! ```
//!
//! See `tests/registry_test.rs` and `tests/dispatcher_test.rs` for complete
//! scenarios.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Registries, identifiers, handler traits and the dispatcher.
pub mod core;
/// Configuration models for the registry and the dispatcher.
pub mod config;
/// Builders to construct registry components from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
