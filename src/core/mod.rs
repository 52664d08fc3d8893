//! Registries, identifiers and the dispatcher.

pub mod audit;
pub mod cluster;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod graph_registry;
pub mod handler;
pub mod ids;
pub mod job_registry;
pub mod resource_registry;
pub mod task_graph;
pub mod task_registry;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use cluster::ClusterRegistry;
pub use descriptor::{
    JobDescriptor, JobState, ResourceDescriptor, ResourceState, ResourceType, TaskDescriptor,
    TaskState,
};
pub use dispatcher::{ConnectionHandle, DispatchError, DispatchStats, Dispatcher};
pub use error::{AppResult, RegistryError, RegistryKey};
pub use graph_registry::TaskGraphRegistry;
pub use handler::{ConnectionInfo, ErrorHandler, MessageHandler, TransportError, TransportErrorKind};
pub use ids::{ConnectionId, IdGenerator, IdKind, JobId, ResourceId, TaskId, TaskOutputId};
pub use job_registry::JobRegistry;
pub use resource_registry::{ResourceEntry, ResourceRegistry};
pub use task_graph::TaskGraph;
pub use task_registry::{TaskRef, TaskRegistry};
