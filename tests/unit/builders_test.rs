//! Tests for builder modules

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use cluster_registry::builders::{build_cluster, build_dispatcher};
use cluster_registry::config::{DispatcherConfig, RegistryConfig};
use cluster_registry::core::{
    AppResult, AuditSink, ConnectionInfo, ErrorHandler, MessageHandler, ResourceType,
    TransportError,
};

#[derive(Clone, Default)]
struct Counter(Arc<Mutex<u32>>);

#[async_trait]
impl MessageHandler<u32> for Counter {
    async fn on_message(&self, _connection: &ConnectionInfo, message: u32) -> AppResult<()> {
        *self.0.lock() += message;
        Ok(())
    }
}

#[async_trait]
impl ErrorHandler for Counter {
    async fn on_error(
        &self,
        _connection: &ConnectionInfo,
        _error: &TransportError,
    ) -> AppResult<()> {
        Ok(())
    }
}

#[test]
fn test_build_cluster_with_audit() {
    let cfg = RegistryConfig {
        audit_capacity: 8,
        ..RegistryConfig::default()
    };
    let built = build_cluster(&cfg).unwrap();
    let audit = built.audit.expect("audit sink configured");

    built
        .registry
        .register_resource("m0", ResourceType::Machine, 1)
        .unwrap();
    assert_eq!(audit.events_with_action("register").len(), 1);
}

#[test]
fn test_build_cluster_without_audit() {
    let cfg = RegistryConfig {
        audit_capacity: 0,
        ..RegistryConfig::default()
    };
    let built = build_cluster(&cfg).unwrap();
    assert!(built.audit.is_none());
}

#[test]
fn test_build_cluster_rejects_invalid_config() {
    let cfg = RegistryConfig {
        dispatcher: DispatcherConfig::new().with_queue_depth(0),
        ..RegistryConfig::default()
    };
    let err = build_cluster(&cfg).err().expect("invalid config");
    assert!(format!("{err:#}").contains("queue_depth"));
}

#[test]
fn test_build_dispatcher_from_config() {
    let cfg = RegistryConfig {
        dispatcher: DispatcherConfig::new().with_worker_count(2),
        audit_capacity: 4,
    };
    let built = build_cluster(&cfg).unwrap();
    let audit = built.audit.map(|a| a as Arc<dyn AuditSink>);

    let counter = Counter::default();
    let dispatcher = build_dispatcher(&cfg, counter.clone(), counter.clone(), audit).unwrap();
    let conn = dispatcher.open_connection("peer:1").unwrap();
    conn.deliver(3).unwrap();
    conn.deliver(4).unwrap();
    dispatcher.shutdown();

    assert_eq!(*counter.0.lock(), 7);
    assert_eq!(dispatcher.stats().worker_count, 2);
}
