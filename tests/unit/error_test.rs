//! Tests for error types

use cluster_registry::core::{
    ConnectionId, IdGenerator, IdKind, RegistryError, RegistryKey, TaskId,
};

#[test]
fn test_not_found_error() {
    let err = RegistryError::NotFound(RegistryKey::Task(TaskId::new(42)));
    assert_eq!(format!("{err}"), "task 42 not found");
    assert!(err.is_not_found());
}

#[test]
fn test_duplicate_key_error() {
    let job = IdGenerator::new().new_job_id();
    let err = RegistryError::DuplicateKey(RegistryKey::TaskGraph(job));
    assert_eq!(format!("{err}"), format!("task graph of job {job} already registered"));
    assert!(!err.is_not_found());
}

#[test]
fn test_identifier_exhausted_error() {
    let err = RegistryError::IdentifierExhausted(IdKind::TaskOutput);
    assert_eq!(format!("{err}"), "task output identifier space exhausted");
}

#[test]
fn test_counter_out_of_range_error() {
    let id = IdGenerator::new().new_resource_id();
    let err = RegistryError::CounterOutOfRange {
        id,
        current: 0,
        delta: -1,
    };
    assert_eq!(
        format!("{err}"),
        format!("counter of resource {id} cannot move by -1 from 0")
    );
}

#[test]
fn test_dispatch_failure_error() {
    let err = RegistryError::DispatchFailure {
        connection: ConnectionId::new(9),
        endpoint: "10.1.2.3:4000".to_string(),
        reason: "handler panicked: boom".to_string(),
    };
    assert_eq!(
        format!("{err}"),
        "dispatch failure on connection 9 (10.1.2.3:4000): handler panicked: boom"
    );
}

#[test]
fn test_registry_error_converts_into_anyhow() {
    fn lookup() -> cluster_registry::core::AppResult<()> {
        let missing: Result<(), RegistryError> =
            Err(RegistryError::NotFound(RegistryKey::Task(TaskId::new(1))));
        missing?;
        Ok(())
    }
    let err = lookup().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RegistryError>(),
        Some(RegistryError::NotFound(_))
    ));
}
