//! Tests for configuration validation

use cluster_registry::config::{DispatcherConfig, RegistryConfig};

#[test]
fn test_dispatcher_config_validation() {
    let valid = DispatcherConfig::new().with_worker_count(4).with_queue_depth(16);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_dispatcher_config_invalid_worker_count() {
    let invalid = DispatcherConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_dispatcher_config_invalid_queue_depth() {
    let invalid = DispatcherConfig::new().with_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_dispatcher_config_invalid_stack_size() {
    let invalid = DispatcherConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_registry_config_from_json() {
    let json = r#"{
        "dispatcher": { "worker_count": 2, "queue_depth": 32 },
        "audit_capacity": 10
    }"#;
    let cfg = RegistryConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.dispatcher.worker_count, 2);
    assert_eq!(cfg.dispatcher.queue_depth, 32);
    assert_eq!(cfg.dispatcher.shutdown_timeout_ms, 2_000);
    assert_eq!(cfg.audit_capacity, 10);
}

#[test]
fn test_registry_config_from_empty_json_uses_defaults() {
    let cfg = RegistryConfig::from_json_str("{}").unwrap();
    assert_eq!(cfg, RegistryConfig::default());
}

#[test]
fn test_registry_config_rejects_invalid_json() {
    let err = RegistryConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));

    let err = RegistryConfig::from_json_str(r#"{ "dispatcher": { "worker_count": 0 } }"#)
        .unwrap_err();
    assert!(err.contains("worker_count"));
}
