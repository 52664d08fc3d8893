//! Handler traits through which the dispatcher delivers inbound events.

use std::fmt;
use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::ids::ConnectionId;
use crate::core::AppResult;

/// Identity of a connection, handed to every handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    /// Dispatcher-assigned connection id.
    pub id: ConnectionId,
    /// Remote endpoint as reported by the transport (e.g. `10.0.0.7:8081`).
    pub remote_endpoint: String,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.id, self.remote_endpoint)
    }
}

/// Classification of a connection-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum TransportErrorKind {
    /// The peer closed or reset the connection.
    #[error("peer disconnected")]
    Disconnected,
    /// A received frame could not be decoded.
    #[error("decode failure")]
    Decode,
    /// The connection timed out.
    #[error("timeout")]
    Timeout,
    /// Any other I/O failure.
    #[error("i/o error")]
    Io,
}

/// A connection-level failure reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Transport-provided description.
    pub detail: String,
}

impl TransportError {
    /// Create an error of the given kind.
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Peer disconnect.
    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Disconnected, detail)
    }

    /// Decode failure.
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, detail)
    }

    /// Timeout.
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, detail)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => TransportErrorKind::Disconnected,
            io::ErrorKind::InvalidData => TransportErrorKind::Decode,
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

/// Receives decoded messages of type `M`.
///
/// Invoked on a dispatcher worker thread, exactly once per delivered message
/// and in delivery order for any one connection. Returning an error (or
/// panicking) is reported as a dispatch failure; the connection stays open and
/// other connections are unaffected.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use cluster_registry::core::{AppResult, ClusterRegistry, ConnectionInfo, MessageHandler};
///
/// struct Heartbeats(std::sync::Arc<ClusterRegistry>);
///
/// #[async_trait]
/// impl MessageHandler<ResourceId> for Heartbeats {
///     async fn on_message(&self, _conn: &ConnectionInfo, id: ResourceId) -> AppResult<()> {
///         self.0.resources().update_descriptor(id, |d| d.state = ResourceState::Idle)?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler<M>: Send + Sync + 'static
where
    M: Send + 'static,
{
    /// Handle one message received on `connection`.
    async fn on_message(&self, connection: &ConnectionInfo, message: M) -> AppResult<()>;
}

/// Receives connection-level failures.
///
/// Invoked at most once per connection; no message of that connection is
/// handled afterwards.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    /// Handle the failure of `connection`.
    async fn on_error(&self, connection: &ConnectionInfo, error: &TransportError) -> AppResult<()>;
}
