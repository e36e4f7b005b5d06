//! Custom error types for the application.
//!
//! This module defines the primary error type, `PlateError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from malformed user input to I/O and store-file issues.
//!
//! Two conditions are deliberately *not* errors:
//!
//! - A closed device link makes send operations logged no-ops (handled by
//!   [`crate::link::LinkHandle`], never thrown across the session boundary).
//! - Missing telemetry during a sampling cycle is a normal outcome, recorded
//!   as a sentinel value by the experiment session.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PlateError>;

/// Application error taxonomy.
///
/// Validation and duplicate errors abort only the single requested
/// operation, before any device write. Corrupt-store conditions are
/// recoverable and reported rather than fatal.
#[derive(Error, Debug)]
pub enum PlateError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("A protocol named '{0}' already exists")]
    DuplicateName(String),

    #[error("Protocol index {0} was never created")]
    InvalidIndex(usize),

    #[error("An experiment is already running")]
    ExperimentAlreadyRunning,

    #[error("Protocol store is corrupt: {0}")]
    CorruptStore(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serial port error: {0}")]
    #[cfg(feature = "instrument_serial")]
    Serial(#[from] serialport::Error),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlateError::DuplicateName("P1".to_string());
        assert_eq!(err.to_string(), "A protocol named 'P1' already exists");
    }

    #[test]
    fn test_invalid_index_display() {
        let err = PlateError::InvalidIndex(7);
        assert!(err.to_string().contains("7"));
    }
}
