//! Error types for the worker bridge.

use thiserror::Error;

/// Errors that can occur while running a worker session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Failed to spawn the worker process.
    #[error("Failed to spawn worker process '{program}': {source}")]
    SpawnError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while reading worker output.
    #[error("Worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error while wiring up the worker.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Upstream relay request failed.
    #[error("Upstream relay error: {0}")]
    Relay(#[from] reqwest::Error),

    /// The consumer side of a channel went away.
    #[error("Channel closed")]
    ChannelClosed,
}
