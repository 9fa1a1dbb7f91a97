//! HTTP request handlers.

mod health;
mod optimize;
mod stream;

pub use health::{health_check, metrics_handler};
pub use optimize::{job_status, submit_job};
pub use stream::stream_job;
