//! Custom error types for the recorder.
//!
//! This module defines the primary error type, `RecorderError`, for the whole crate, and
//! `ServiceError` for failures reported by the external naming, configuration and
//! container-writer services.
//!
//! ## Error Hierarchy
//!
//! `RecorderError` consolidates three groups of failures:
//!
//! - **Fatal, run-aborting**: `OutputDirectory`, `DuplicateEntry`, `Service`, `Io`,
//!   `Container`, `FeatureNotEnabled`. The recorder tears the back-end down before these
//!   reach the caller.
//! - **Contract violations**: `InvalidState`, `NonMonotonicPoint`, `InvalidEnvironment`,
//!   `ShapeMismatch`. These indicate a misbehaving run driver.
//! - **Configuration**: `Config` wraps `figment` extraction errors and
//!   `Configuration` covers semantic validation failures.
//!
//! Degraded conditions (unsupported element types, a component that cannot be fetched,
//! channels not covered by any component) are never errors; they are logged through
//! `tracing` and the run continues.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the recorder error type.
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

/// Failure reported by an external service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot create output directory '{}': {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "'{entry}' already exists in {}. The run was aborted to prevent data corruption; \
         this usually means the scan serial number is stale",
        file.display()
    )]
    DuplicateEntry { entry: String, file: PathBuf },

    #[error("External service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot {operation} while recorder is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Point index {got} does not follow previous point {previous}")]
    NonMonotonicPoint { previous: u64, got: u64 },

    #[error("Invalid run environment: {0}")]
    InvalidEnvironment(String),

    #[error("Value for '{label}' has {got} elements, expected {expected}")]
    ShapeMismatch {
        label: String,
        expected: usize,
        got: usize,
    },

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for RecorderError {
    fn from(value: figment::Error) -> Self {
        RecorderError::Config(Box::new(value))
    }
}

impl RecorderError {
    /// Whether the error aborts the run (as opposed to a driver contract violation).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RecorderError::InvalidState { .. }
                | RecorderError::NonMonotonicPoint { .. }
                | RecorderError::InvalidEnvironment(_)
        )
    }
}

#[cfg(feature = "storage_hdf5")]
impl From<hdf5::Error> for RecorderError {
    fn from(value: hdf5::Error) -> Self {
        RecorderError::Container(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_entry_message_names_entry_and_file() {
        let err = RecorderError::DuplicateEntry {
            entry: "entry12".into(),
            file: PathBuf::from("/data/scan.h5"),
        };
        let msg = err.to_string();
        assert!(msg.contains("entry12"));
        assert!(msg.contains("/data/scan.h5"));
        assert!(err.is_fatal());
    }

    #[test]
    fn service_error_converts() {
        let err: RecorderError = ServiceError::Unreachable("selector".into()).into();
        match err {
            RecorderError::Service(ServiceError::Unreachable(name)) => assert_eq!(name, "selector"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn contract_violations_are_not_fatal() {
        let err = RecorderError::NonMonotonicPoint {
            previous: 3,
            got: 3,
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("does not follow"));
    }
}
