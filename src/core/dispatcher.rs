//! Delivery of inbound messages and transport errors to registered handlers.
//!
//! The transport opens a connection on a [`Dispatcher`] and pushes decoded
//! messages and failures into the returned [`ConnectionHandle`]. Each
//! connection is pinned to one shard: a dedicated OS thread with its own
//! single-threaded tokio runtime that drives the async handlers. Pinning gives
//! per-connection FIFO delivery without ordering across connections.
//!
//! # Guarantees
//!
//! - Every accepted message reaches the message handler exactly once, in the
//!   order it was delivered on its connection
//! - A connection fails at most once; after its error event no further event
//!   of that connection is accepted
//! - A handler error or panic is logged, counted and recorded as a
//!   [`crate::core::RegistryError::DispatchFailure`]; the shard keeps running
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_registry::config::DispatcherConfig;
//! use cluster_registry::core::{Dispatcher, TransportError};
//!
//! let dispatcher = Dispatcher::new(
//!     DispatcherConfig::new().with_worker_count(4),
//!     my_message_handler,
//!     my_error_handler,
//! )?;
//!
//! let conn = dispatcher.open_connection("10.0.0.7:8081")?;
//! conn.deliver(message)?;
//! conn.fail(TransportError::disconnected("peer reset"))?;
//!
//! dispatcher.shutdown();
//! ```

mod native;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::core::handler::{ConnectionInfo, ErrorHandler, MessageHandler, TransportError};
use crate::core::ids::ConnectionId;

pub use native::{ConnectionHandle, Dispatcher};

/// Errors returned to the transport by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The dispatcher no longer accepts events.
    #[error("dispatcher has been shut down")]
    Shutdown,
    /// The connection already reported its failure.
    #[error("connection {0} already failed")]
    ConnectionClosed(ConnectionId),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Runtime or thread setup failed.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Snapshot of dispatcher activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Number of shard threads.
    pub worker_count: usize,
    /// Connections opened so far.
    pub connections_opened: u64,
    /// Messages accepted by `deliver`.
    pub messages_delivered: u64,
    /// Message handler invocations that completed (successfully or not).
    pub messages_handled: u64,
    /// Error handler invocations that completed (successfully or not).
    pub errors_handled: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
    /// Events accepted but not yet handled.
    pub queued_events: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    pub connections_opened: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_handled: AtomicU64,
    pub errors_handled: AtomicU64,
    pub handler_failures: AtomicU64,
    pub queued_events: AtomicU64,
}

impl DispatchCounters {
    pub fn snapshot(&self, worker_count: usize) -> DispatchStats {
        DispatchStats {
            worker_count,
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            errors_handled: self.errors_handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            queued_events: self.queued_events.load(Ordering::Relaxed),
        }
    }
}

/// Handler pair registered for a connection.
pub(crate) struct Handlers<M: Send + 'static> {
    pub message: Arc<dyn MessageHandler<M>>,
    pub error: Arc<dyn ErrorHandler>,
}

impl<M: Send + 'static> Clone for Handlers<M> {
    fn clone(&self) -> Self {
        Self {
            message: Arc::clone(&self.message),
            error: Arc::clone(&self.error),
        }
    }
}

/// Unit of work queued on a shard.
pub(crate) enum DispatchEvent<M: Send + 'static> {
    Message {
        connection: Arc<ConnectionInfo>,
        message: M,
        handler: Arc<dyn MessageHandler<M>>,
    },
    Error {
        connection: Arc<ConnectionInfo>,
        error: TransportError,
        handler: Arc<dyn ErrorHandler>,
    },
}

/// Shard that owns `connection` among `shard_count` shards.
#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn shard_for(connection: ConnectionId, shard_count: usize) -> usize {
    (connection.get() % shard_count as u64) as usize
}
