//! Core domain errors.

use thiserror::Error;

/// Core domain errors for foodmap.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A required request field is missing or blank.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A request field has an unacceptable value.
    #[error("Invalid field '{field}': {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}
