//! Server-side error types.

use foodmap_core::JobId;
use thiserror::Error;

/// Errors returned by the job registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),
}

/// Errors raised while assembling the server from its configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid upstream URL '{url}': {message}")]
    InvalidUpstreamUrl { url: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
