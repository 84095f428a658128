//! Tests for error types

use abtest_core::Error;

#[test]
fn test_invalid_configuration_error() {
    let error = Error::InvalidConfiguration("weights must be positive".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid experiment configuration"));
    assert!(error_str.contains("weights must be positive"));
    assert!(error_str.contains("Fix the definition"));
}

#[test]
fn test_not_found_error() {
    let error = Error::NotFound("exp-404".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Experiment not found"));
    assert!(error_str.contains("exp-404"));
}

#[test]
fn test_storage_unavailable_error() {
    let error = Error::StorageUnavailable("disk full".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage unavailable"));
    assert!(error_str.contains("disk full"));
}

#[test]
fn test_invalid_state_transition_error() {
    let error = Error::InvalidStateTransition {
        experiment_id: "exp-1".to_string(),
        from: "completed".to_string(),
        to: "running".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("exp-1"));
    assert!(error_str.contains("completed -> running"));
}

#[test]
fn test_invalid_input_error() {
    let error = Error::InvalidInput("user id must not be empty".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid input"));
    assert!(error_str.contains("user id must not be empty"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
}

#[test]
fn test_serialization_error_conversion() {
    let json_error = serde_json::from_str::<u32>("not json").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_error_debug() {
    let error = Error::NotFound("exp".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("NotFound"));
}

#[test]
fn test_result_type_alias() {
    // Test that Result<T> can be used
    #[allow(clippy::unnecessary_wraps)]
    fn returns_result() -> abtest_core::Result<i32> {
        Ok(42)
    }

    let result = returns_result();
    assert!(result.is_ok());
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn test_result_type_alias_error() {
    fn returns_error() -> abtest_core::Result<i32> {
        Err(Error::NotFound("test".to_string()))
    }

    let result = returns_error();
    assert!(result.is_err());
}
