//! Foodmap Server Library
//!
//! HTTP front end for the optimization worker: validates submissions, tracks
//! poll-mode jobs in memory, and streams live worker events over SSE.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod multiplexer;
pub mod registry;
pub mod state;

pub use config::Config;
pub use error::{RegistryError, ServerError};
pub use gateway::{ConsumptionMode, SessionSource, SubmissionGateway};
pub use multiplexer::{ClientMessage, ClientStream, ForwardingSink, StreamMultiplexer};
pub use registry::{JobCounts, JobRegistry, RegistrySink};
pub use state::AppState;
