//! Tests for audit sink

use cluster_registry::core::{build_audit_event, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("job", "j-1", "admit", Some("2 task(s)".to_string()));
    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0], event);
    assert_eq!(events[0].entity, "job");
    assert_eq!(events[0].entity_id, "j-1");
    assert_eq!(events[0].action, "admit");
    assert!(!events[0].event_id.is_empty());
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("task", 1, "place", None));
    sink.record(build_audit_event("task", 2, "place", None));
    sink.record(build_audit_event("task", 3, "evict", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].entity_id, "2"); // First one popped
    assert_eq!(events[1].entity_id, "3");
    assert_eq!(sink.events_with_action("evict").len(), 1);
}

#[test]
fn test_zero_capacity_sink_records_nothing() {
    let sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("resource", "r", "register", None));
    assert!(sink.events().is_empty());
}
