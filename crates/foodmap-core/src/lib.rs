//! foodmap Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Child processes
//! - Network/HTTP
//! - Runtime specifics
//!
//! All types here describe optimization jobs and the events their workers emit.

pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod request;
pub mod status;

// Re-export commonly used types
pub use error::CoreError;
pub use event::StreamEvent;
pub use ids::JobId;
pub use job::{Job, JobView};
pub use request::{OptimizationRequest, ValidatedRequest, DEFAULT_MIN_BUDGET};
pub use status::{JobStatus, SessionState};
