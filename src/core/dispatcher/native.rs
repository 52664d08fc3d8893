//! Thread-per-shard dispatcher.
//!
//! Each shard is an OS thread owning a bounded crossbeam channel and a
//! single-threaded tokio runtime. Workers block on `recv`; shutdown drops the
//! senders, the workers drain what is already queued and exit.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::handler::{ConnectionInfo, ErrorHandler, MessageHandler, TransportError};
use crate::core::ids::ConnectionId;
use crate::core::{AppResult, RegistryError};

use super::{shard_for, DispatchCounters, DispatchError, DispatchEvent, DispatchStats, Handlers};

/// State shared between the dispatcher and its connection handles.
struct Shared<M: Send + 'static> {
    /// One sender per shard; `None` once shut down.
    shards: RwLock<Option<Vec<Sender<DispatchEvent<M>>>>>,
    counters: DispatchCounters,
}

impl<M: Send + 'static> Shared<M> {
    fn send(&self, shard: usize, event: DispatchEvent<M>) -> Result<(), DispatchError> {
        // Clone the sender so a send blocked on a full queue does not hold the
        // shards lock that `shutdown` needs.
        let sender = self
            .shards
            .read()
            .as_ref()
            .map(|senders| senders[shard].clone())
            .ok_or(DispatchError::Shutdown)?;
        self.counters.queued_events.fetch_add(1, Ordering::AcqRel);
        sender.send(event).map_err(|_| {
            self.counters.queued_events.fetch_sub(1, Ordering::AcqRel);
            DispatchError::Shutdown
        })
    }
}

/// Dispatcher delivering messages of type `M` and transport errors to
/// handlers on dedicated shard threads.
pub struct Dispatcher<M: Send + 'static> {
    config: DispatcherConfig,
    shared: Arc<Shared<M>>,
    handlers: Handlers<M>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_connection: AtomicU64,
}

impl<M: Send + 'static> Dispatcher<M> {
    /// Start `config.worker_count` shard threads delivering to the given
    /// default handlers.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidConfig`] if the configuration is invalid
    /// - [`DispatchError::Internal`] if a runtime or thread cannot be created
    pub fn new(
        config: DispatcherConfig,
        message_handler: impl MessageHandler<M>,
        error_handler: impl ErrorHandler,
    ) -> Result<Self, DispatchError> {
        Self::build(config, message_handler, error_handler, None)
    }

    /// Like [`Dispatcher::new`], also recording dispatch failures in `audit`.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::new`].
    pub fn with_audit(
        config: DispatcherConfig,
        message_handler: impl MessageHandler<M>,
        error_handler: impl ErrorHandler,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, DispatchError> {
        Self::build(config, message_handler, error_handler, Some(audit))
    }

    fn build(
        config: DispatcherConfig,
        message_handler: impl MessageHandler<M>,
        error_handler: impl ErrorHandler,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(DispatchError::InvalidConfig)?;

        let mut senders = Vec::with_capacity(config.worker_count);
        let mut receivers = Vec::with_capacity(config.worker_count);
        for _ in 0..config.worker_count {
            let (tx, rx) = bounded::<DispatchEvent<M>>(config.queue_depth);
            senders.push(tx);
            receivers.push(rx);
        }
        let shared = Arc::new(Shared {
            shards: RwLock::new(Some(senders)),
            counters: DispatchCounters::default(),
        });

        let mut workers = Vec::with_capacity(config.worker_count);
        for (shard, rx) in receivers.into_iter().enumerate() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| DispatchError::Internal(format!("shard {shard} runtime: {e}")))?;
            let worker = spawn_shard(
                shard,
                rx,
                Arc::clone(&shared),
                runtime,
                audit.clone(),
                config.thread_stack_size,
            )
            .map_err(|e| DispatchError::Internal(format!("shard {shard} thread: {e}")))?;
            workers.push(worker);
        }

        info!(
            worker_count = config.worker_count,
            queue_depth = config.queue_depth,
            "dispatcher started"
        );

        Ok(Self {
            config,
            shared,
            handlers: Handlers {
                message: Arc::new(message_handler),
                error: Arc::new(error_handler),
            },
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Open a connection using the dispatcher's default handlers.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Shutdown`] if the dispatcher has been shut down.
    pub fn open_connection(
        &self,
        remote_endpoint: impl Into<String>,
    ) -> Result<ConnectionHandle<M>, DispatchError> {
        self.open(remote_endpoint.into(), self.handlers.clone())
    }

    /// Open a connection with its own handler pair.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Shutdown`] if the dispatcher has been shut down.
    pub fn open_connection_with(
        &self,
        remote_endpoint: impl Into<String>,
        message_handler: impl MessageHandler<M>,
        error_handler: impl ErrorHandler,
    ) -> Result<ConnectionHandle<M>, DispatchError> {
        let handlers = Handlers {
            message: Arc::new(message_handler),
            error: Arc::new(error_handler),
        };
        self.open(remote_endpoint.into(), handlers)
    }

    fn open(
        &self,
        remote_endpoint: String,
        handlers: Handlers<M>,
    ) -> Result<ConnectionHandle<M>, DispatchError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(DispatchError::Shutdown);
        }
        let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let shard = shard_for(id, self.config.worker_count);
        self.shared
            .counters
            .connections_opened
            .fetch_add(1, Ordering::Relaxed);
        debug!(connection = %id, endpoint = %remote_endpoint, shard, "connection opened");
        Ok(ConnectionHandle {
            info: Arc::new(ConnectionInfo { id, remote_endpoint }),
            shard,
            handlers,
            shared: Arc::clone(&self.shared),
            failed: Mutex::new(false),
        })
    }

    /// Current dispatcher statistics.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.shared.counters.snapshot(self.config.worker_count)
    }

    /// Stop accepting events, let the shards drain their queues and join them.
    ///
    /// Each shard gets `config.shutdown_timeout_ms` to exit; a shard that does
    /// not is detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down dispatcher");

        // Dropping the senders lets workers finish the queue and see a
        // disconnected channel.
        *self.shared.shards.write() = None;

        let timeout = self.config.shutdown_timeout();
        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (shard, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(timeout) {
                Ok(true) => debug!(shard, "shard joined"),
                Ok(false) => warn!(shard, "shard thread panicked"),
                Err(_) => {
                    warn!(shard, "shard did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        info!(worker_count, "dispatcher shut down");
    }
}

impl<M: Send + 'static> Drop for Dispatcher<M> {
    fn drop(&mut self) {
        // Signal only; joining here could hang on a stuck handler.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.shared.shards.write() = None;
            debug!("dispatcher dropped without explicit shutdown, shards detached");
        }
    }
}

/// The transport's end of one connection.
///
/// Events pushed through a handle are handled in push order. Concurrent
/// pushes on the same handle are serialized. A handler running on the
/// connection's own shard must not push into a full queue of that shard: the
/// push blocks until the shard makes room.
pub struct ConnectionHandle<M: Send + 'static> {
    info: Arc<ConnectionInfo>,
    shard: usize,
    handlers: Handlers<M>,
    shared: Arc<Shared<M>>,
    /// Set once the connection has reported its failure. Held across the
    /// enqueue so no message can be queued behind the error event.
    failed: Mutex<bool>,
}

impl<M: Send + 'static> ConnectionHandle<M> {
    /// Connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    /// Remote endpoint.
    #[must_use]
    pub fn remote_endpoint(&self) -> &str {
        &self.info.remote_endpoint
    }

    /// Connection identity as passed to handlers.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Whether the connection has reported its failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        *self.failed.lock()
    }

    /// Queue a decoded message for the message handler. Blocks while the
    /// shard queue is full.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ConnectionClosed`] after [`ConnectionHandle::fail`]
    /// - [`DispatchError::Shutdown`] if the dispatcher has been shut down
    pub fn deliver(&self, message: M) -> Result<(), DispatchError> {
        let failed = self.failed.lock();
        if *failed {
            return Err(DispatchError::ConnectionClosed(self.info.id));
        }
        self.shared.send(
            self.shard,
            DispatchEvent::Message {
                connection: Arc::clone(&self.info),
                message,
                handler: Arc::clone(&self.handlers.message),
            },
        )?;
        drop(failed);
        self.shared
            .counters
            .messages_delivered
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Report the connection's failure to the error handler. The connection
    /// accepts no further events afterwards.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ConnectionClosed`] if a failure was already reported
    /// - [`DispatchError::Shutdown`] if the dispatcher has been shut down
    pub fn fail(&self, error: TransportError) -> Result<(), DispatchError> {
        let mut failed = self.failed.lock();
        if *failed {
            debug!(
                connection = %self.info.id,
                error = %error,
                "ignoring failure of closed connection"
            );
            return Err(DispatchError::ConnectionClosed(self.info.id));
        }
        *failed = true;
        self.shared.send(
            self.shard,
            DispatchEvent::Error {
                connection: Arc::clone(&self.info),
                error,
                handler: Arc::clone(&self.handlers.error),
            },
        )
    }
}

fn spawn_shard<M: Send + 'static>(
    shard: usize,
    rx: Receiver<DispatchEvent<M>>,
    shared: Arc<Shared<M>>,
    runtime: Runtime,
    audit: Option<Arc<dyn AuditSink>>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("dispatch-{shard}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(shard, "shard started");
            // `recv` keeps yielding queued events after the senders are gone
            // and only errors once the channel is empty.
            while let Ok(event) = rx.recv() {
                shared.counters.queued_events.fetch_sub(1, Ordering::AcqRel);
                let (connection, outcome, handled) = match event {
                    DispatchEvent::Message {
                        connection,
                        message,
                        handler,
                    } => {
                        let outcome =
                            run_isolated(&runtime, handler.on_message(&connection, message));
                        (connection, outcome, &shared.counters.messages_handled)
                    }
                    DispatchEvent::Error {
                        connection,
                        error,
                        handler,
                    } => {
                        debug!(
                            shard,
                            connection = %connection,
                            error = %error,
                            "delivering transport error"
                        );
                        let outcome = run_isolated(&runtime, handler.on_error(&connection, &error));
                        (connection, outcome, &shared.counters.errors_handled)
                    }
                };
                handled.fetch_add(1, Ordering::Relaxed);

                if let Err(reason) = outcome {
                    shared.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                    let failure = RegistryError::DispatchFailure {
                        connection: connection.id,
                        endpoint: connection.remote_endpoint.clone(),
                        reason,
                    };
                    error!(shard, connection = %connection.id, error = %failure, "handler failed");
                    if let Some(sink) = &audit {
                        sink.record(build_audit_event(
                            "connection",
                            connection.id,
                            "dispatch_failure",
                            Some(failure.to_string()),
                        ));
                    }
                }
            }
            debug!(shard, "shard exiting");
        })
}

/// Drive a handler future to completion, turning an error or a panic into a
/// failure reason.
fn run_isolated<F>(runtime: &Runtime, fut: F) -> Result<(), String>
where
    F: Future<Output = AppResult<()>>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(fut))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_reason(payload.as_ref())),
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "handler panicked".to_string(), |msg| format!("handler panicked: {msg}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<u32>>>,
        errors: Arc<Mutex<Vec<TransportError>>>,
    }

    #[async_trait]
    impl MessageHandler<u32> for Recorder {
        async fn on_message(&self, _connection: &ConnectionInfo, message: u32) -> AppResult<()> {
            self.seen.lock().push(message);
            Ok(())
        }
    }

    #[async_trait]
    impl ErrorHandler for Recorder {
        async fn on_error(
            &self,
            _connection: &ConnectionInfo,
            error: &TransportError,
        ) -> AppResult<()> {
            self.errors.lock().push(error.clone());
            Ok(())
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig::new().with_worker_count(2).with_queue_depth(16)
    }

    #[test]
    fn test_deliver_then_shutdown_drains_queue() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(config(), recorder.clone(), recorder.clone()).unwrap();
        let conn = dispatcher.open_connection("peer:1").unwrap();
        for i in 0..10 {
            conn.deliver(i).unwrap();
        }
        dispatcher.shutdown();

        assert_eq!(*recorder.seen.lock(), (0..10).collect::<Vec<_>>());
        let stats = dispatcher.stats();
        assert_eq!(stats.messages_delivered, 10);
        assert_eq!(stats.messages_handled, 10);
        assert_eq!(stats.queued_events, 0);
    }

    #[test]
    fn test_fail_closes_connection() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(config(), recorder.clone(), recorder.clone()).unwrap();
        let conn = dispatcher.open_connection("peer:2").unwrap();
        conn.deliver(1).unwrap();
        conn.fail(TransportError::timeout("no heartbeat")).unwrap();
        assert!(conn.is_failed());
        assert_eq!(conn.deliver(2), Err(DispatchError::ConnectionClosed(conn.id())));
        assert_eq!(
            conn.fail(TransportError::disconnected("again")),
            Err(DispatchError::ConnectionClosed(conn.id()))
        );
        dispatcher.shutdown();

        assert_eq!(*recorder.seen.lock(), vec![1]);
        assert_eq!(recorder.errors.lock().len(), 1);
        assert_eq!(dispatcher.stats().errors_handled, 1);
    }

    #[test]
    fn test_open_after_shutdown_is_rejected() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(config(), recorder.clone(), recorder).unwrap();
        let conn = dispatcher.open_connection("peer:3").unwrap();
        dispatcher.shutdown();
        assert!(matches!(dispatcher.open_connection("peer:4"), Err(DispatchError::Shutdown)));
        assert_eq!(conn.deliver(5), Err(DispatchError::Shutdown));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let recorder = Recorder::default();
        let result = Dispatcher::<u32>::new(
            DispatcherConfig::new().with_worker_count(0),
            recorder.clone(),
            recorder,
        );
        assert!(matches!(result, Err(DispatchError::InvalidConfig(_))));
    }

    #[test]
    fn test_panic_reason_extracts_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(payload.as_ref()), "handler panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_reason(payload.as_ref()), "handler panicked: owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_reason(payload.as_ref()), "handler panicked");
    }

    /// Blocks every message until the gate sender is dropped.
    struct Gated {
        gate: Receiver<()>,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl MessageHandler<u32> for Gated {
        async fn on_message(&self, _connection: &ConnectionInfo, message: u32) -> AppResult<()> {
            let _ = self.gate.recv();
            self.seen.lock().push(message);
            Ok(())
        }
    }

    #[async_trait]
    impl ErrorHandler for Gated {
        async fn on_error(
            &self,
            _connection: &ConnectionInfo,
            _error: &TransportError,
        ) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_shutdown_does_not_wait_on_blocked_sender() {
        use std::time::{Duration, Instant};

        let (gate_tx, gate_rx) = bounded::<()>(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(
            DispatcherConfig::new().with_worker_count(2).with_queue_depth(1),
            recorder.clone(),
            recorder.clone(),
        )
        .unwrap();
        let gated = dispatcher
            .open_connection_with(
                "peer:gated",
                Gated {
                    gate: gate_rx,
                    seen: Arc::clone(&seen),
                },
                recorder.clone(),
            )
            .unwrap();
        let other = dispatcher.open_connection("peer:other").unwrap();
        assert_ne!(shard_for(gated.id(), 2), shard_for(other.id(), 2));

        gated.deliver(1).unwrap();
        while dispatcher.stats().queued_events > 0 {
            thread::sleep(Duration::from_millis(1));
        }
        gated.deliver(2).unwrap();

        thread::scope(|s| {
            // Blocks on the full queue until the gate opens.
            let blocked = s.spawn(|| gated.deliver(3));
            thread::sleep(Duration::from_millis(20));
            let stopper = s.spawn(|| dispatcher.shutdown());

            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                match other.deliver(0) {
                    Err(DispatchError::Shutdown) => break,
                    Ok(()) => thread::sleep(Duration::from_millis(1)),
                    Err(e) => panic!("unexpected error: {e}"),
                }
                assert!(Instant::now() < deadline, "shutdown never took effect");
            }

            drop(gate_tx);
            assert_eq!(blocked.join().unwrap(), Ok(()));
            stopper.join().unwrap();
        });

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(dispatcher.stats().queued_events, 0);
    }
}
