//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use foodmap_core::DEFAULT_MIN_BUDGET;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_WORKER_PROGRAM: &str = "python3";
pub const DEFAULT_POLL_SCRIPT: &str = "agents/location_agent/run_optimization.py";
pub const DEFAULT_STREAM_SCRIPT: &str = "agents/location_agent/run_optimization_stream.py";
pub const DEFAULT_AGENT_STEP_DELAY_MS: u64 = 500;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub bind_addr: String,

    /// Interpreter used to run worker scripts.
    pub worker_program: String,

    /// Worker script for poll-mode jobs.
    pub poll_script: PathBuf,

    /// Worker script for streamed jobs.
    pub stream_script: PathBuf,

    /// Extra environment passed to every worker.
    pub worker_env: Vec<(String, String)>,

    /// Whether workers are passed `--min-distance`. Only some worker
    /// scripts accept it.
    pub forward_min_distance: bool,

    /// Smallest accepted budget.
    pub min_budget: f64,

    /// How long each agent_step event is held before it is forwarded.
    pub agent_step_delay: Duration,

    /// Interval between SSE keepalive comments. Zero disables them.
    pub keepalive_interval: Duration,

    /// Upstream event stream to relay instead of spawning workers.
    pub upstream_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            worker_program: DEFAULT_WORKER_PROGRAM.to_string(),
            poll_script: PathBuf::from(DEFAULT_POLL_SCRIPT),
            stream_script: PathBuf::from(DEFAULT_STREAM_SCRIPT),
            worker_env: Vec::new(),
            forward_min_distance: true,
            min_budget: DEFAULT_MIN_BUDGET,
            agent_step_delay: Duration::from_millis(DEFAULT_AGENT_STEP_DELAY_MS),
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            upstream_url: None,
        }
    }
}

/// Parse a `KEY=VALUE` pair.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker_program, "python3");
        assert_eq!(
            config.poll_script,
            PathBuf::from("agents/location_agent/run_optimization.py")
        );
        assert_eq!(
            config.stream_script,
            PathBuf::from("agents/location_agent/run_optimization_stream.py")
        );
        assert!(config.forward_min_distance);
        assert_eq!(config.min_budget, 500_000.0);
        assert_eq!(config.agent_step_delay, Duration::from_millis(500));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert!(config.upstream_url.is_none());
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("MONGODB_DB=foodmap").unwrap(),
            ("MONGODB_DB".to_string(), "foodmap".to_string())
        );
        assert_eq!(
            parse_env_pair("URI=mongodb://h/?a=b").unwrap(),
            ("URI".to_string(), "mongodb://h/?a=b".to_string())
        );
        assert!(parse_env_pair("NOEQUALS").is_err());
        assert!(parse_env_pair("=value").is_err());
    }
}
