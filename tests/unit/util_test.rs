//! Tests for utility functions

use cluster_registry::util::{init_tracing, now_ms, DEFAULT_LOG_DIRECTIVE};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(a > 0);
    assert!(b >= a);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}

#[test]
fn test_default_directive_targets_crate() {
    assert!(DEFAULT_LOG_DIRECTIVE.starts_with("cluster_registry"));
}
