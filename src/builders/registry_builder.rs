//! Builders to construct the cluster registry and dispatcher from configuration.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::config::RegistryConfig;
use crate::core::{
    AppResult, AuditSink, ClusterRegistry, DispatchError, Dispatcher, ErrorHandler,
    InMemoryAuditSink, MessageHandler,
};

/// A cluster registry together with its audit trail, if one is configured.
pub struct BuiltCluster {
    /// Shared registry state.
    pub registry: Arc<ClusterRegistry>,
    /// In-memory audit trail; `None` when `audit_capacity` is `0`.
    pub audit: Option<Arc<InMemoryAuditSink>>,
}

/// Build a cluster registry from configuration.
///
/// # Errors
///
/// Returns an error if the configuration does not validate.
pub fn build_cluster(cfg: &RegistryConfig) -> AppResult<BuiltCluster> {
    cfg.validate()
        .map_err(|e| anyhow!(e))
        .context("registry config invalid")?;

    let audit = (cfg.audit_capacity > 0)
        .then(|| Arc::new(InMemoryAuditSink::new(cfg.audit_capacity)));
    let registry = match &audit {
        Some(sink) => ClusterRegistry::new().with_audit(Arc::clone(sink) as Arc<dyn AuditSink>),
        None => ClusterRegistry::new(),
    };
    info!(audit_capacity = cfg.audit_capacity, "cluster registry built");

    Ok(BuiltCluster {
        registry: Arc::new(registry),
        audit,
    })
}

/// Build a dispatcher from the dispatcher section of `cfg`, recording handler
/// failures in `audit` when given.
///
/// # Errors
///
/// Same as [`Dispatcher::new`].
pub fn build_dispatcher<M: Send + 'static>(
    cfg: &RegistryConfig,
    message_handler: impl MessageHandler<M>,
    error_handler: impl ErrorHandler,
    audit: Option<Arc<dyn AuditSink>>,
) -> Result<Dispatcher<M>, DispatchError> {
    let dispatcher_cfg = cfg.dispatcher.clone();
    match audit {
        Some(sink) => Dispatcher::with_audit(dispatcher_cfg, message_handler, error_handler, sink),
        None => Dispatcher::new(dispatcher_cfg, message_handler, error_handler),
    }
}
