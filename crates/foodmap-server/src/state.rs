//! Shared application state.

use std::sync::Arc;

use crate::config::Config;
use crate::error::ServerError;
use crate::gateway::SubmissionGateway;
use crate::multiplexer::StreamMultiplexer;
use crate::registry::JobRegistry;

/// Shared application state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,

    /// Request validation and worker invocation.
    pub gateway: SubmissionGateway,

    /// Poll-mode jobs indexed by JobId.
    pub registry: JobRegistry,

    /// Stream-mode client channels.
    pub multiplexer: StreamMultiplexer,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: Config) -> Result<Arc<Self>, ServerError> {
        let gateway = SubmissionGateway::new(&config)?;
        let multiplexer =
            StreamMultiplexer::new(config.agent_step_delay, config.keepalive_interval);
        Ok(Arc::new(Self {
            config,
            gateway,
            registry: JobRegistry::new(),
            multiplexer,
        }))
    }
}
