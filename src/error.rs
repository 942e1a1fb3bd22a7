//! Custom error types for the observation engine.
//!
//! This module defines the primary error type, `ObsError`, used across the
//! whole crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify the failures an unattended observation run can
//! hit, from malformed job scripts to transient hardware faults.
//!
//! ## Error Taxonomy
//!
//! - **`Parse`**: a job script or action command does not match any known
//!   grammar. Fatal to job construction and surfaced before any run starts.
//! - **`Configuration`**: semantically invalid setup, such as a missing
//!   scenario file, a camera without acquisition settings, or a polarimetric
//!   cycle submitted without a step motor attached. Prevents a run from
//!   starting.
//! - **`Hardware`**: a device call failed. Treated as transient and retried
//!   up to a bounded number of attempts by [`crate::retry::retry`]; exhausting
//!   the budget re-raises the last error as a run failure.
//! - **`Cancelled`**: cooperative cancellation was requested. Never retried,
//!   always propagated unchanged to the `JobManager`, which reports it
//!   distinctly from other failures.
//! - **`Io`**: wraps `std::io::Error` for script file and stream access.
//!
//! Action and `Job` code never catches errors (apart from the bounded retry
//! helper); only the manager's top-level run driver catches, classifies and
//! reports them.

use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type ObsResult<T> = std::result::Result<T, ObsError>;

/// Error type covering every failure class of the observation engine.
#[derive(Error, Debug)]
pub enum ObsError {
    /// Malformed script text or an action command that matches no grammar.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or incomplete setup that prevents a run from starting.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A device call failed. Candidates for bounded retry.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Cooperative cancellation was requested. Never retried.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O failure while reading a job script or configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObsError {
    /// Whether this error is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ObsError::Cancelled)
    }
}

impl From<serde_json::Error> for ObsError {
    fn from(err: serde_json::Error) -> Self {
        ObsError::Parse(err.to_string())
    }
}

impl From<figment::Error> for ObsError {
    fn from(err: figment::Error) -> Self {
        ObsError::Configuration(err.to_string())
    }
}
