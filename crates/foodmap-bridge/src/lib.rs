//! Worker bridge for Foodmap
//!
//! This crate runs the external optimization worker as a subprocess and turns
//! its line-oriented output into typed [`StreamEvent`]s:
//!
//! ```text
//! stdout bytes -> LineFramer -> ResultBlockCollector -> MessageParser -> SessionSink
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use foodmap_bridge::{ChannelSink, ProcessSession, WorkerCommand};
//!
//! async fn run_worker() -> Result<(), Box<dyn std::error::Error>> {
//!     let command = WorkerCommand::new("python3")
//!         .arg("run_optimization_stream.py")
//!         .args(["--domain", "la_central", "--budget", "750000"]);
//!
//!     let (sink, mut rx) = ChannelSink::new();
//!     let handle = ProcessSession::start(command, Arc::new(sink)).await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//!     handle.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! [`StreamEvent`]: foodmap_core::StreamEvent

mod collector;
mod decoder;
mod error;
mod framer;
mod parser;
mod relay;
mod session;
mod sink;

// Re-export main types
pub use collector::{Collected, ResultBlockCollector, Sentinel, RESULT_BEGIN, RESULT_END};
pub use decoder::{Decoded, OutputDecoder};
pub use error::BridgeError;
pub use framer::{LineFramer, LineReader};
pub use parser::{is_error_line, MessageParser, ParsedLine};
pub use relay::{sse_data, RelaySession, UPSTREAM_CLOSED_MESSAGE};
pub use session::{
    ProcessSession, SessionHandle, WorkerCommand, CANCELLED_MESSAGE, NO_RESULT_MESSAGE,
};
pub use sink::{ChannelSink, SessionEvent, SessionSink};
