//! Submission gateway: request validation and worker invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use foodmap_bridge::{
    BridgeError, ProcessSession, RelaySession, SessionHandle, SessionSink, WorkerCommand,
};
use foodmap_core::{CoreError, OptimizationRequest, ValidatedRequest};
use reqwest::Url;
use tracing::debug;

use crate::config::Config;
use crate::error::ServerError;

/// How the client consumes a job's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionMode {
    /// Submit, then poll the registry for status.
    Poll,
    /// Hold a live event stream open.
    Stream,
}

/// Where a session's events come from.
#[derive(Debug, Clone)]
pub enum SessionSource {
    /// A local worker process.
    Process(WorkerCommand),
    /// An upstream bridge's event stream.
    Relay { client: reqwest::Client, url: Url },
}

impl SessionSource {
    /// Start the session, reporting to `sink`.
    pub async fn start(self, sink: Arc<dyn SessionSink>) -> Result<SessionHandle, BridgeError> {
        match self {
            SessionSource::Process(command) => ProcessSession::start(command, sink).await,
            SessionSource::Relay { client, url } => {
                Ok(RelaySession::start(client, url.to_string(), sink))
            }
        }
    }
}

/// Validates submissions and turns them into session sources.
#[derive(Debug, Clone)]
pub struct SubmissionGateway {
    worker_program: String,
    poll_script: PathBuf,
    stream_script: PathBuf,
    worker_env: Vec<(String, String)>,
    forward_min_distance: bool,
    min_budget: f64,
    upstream: Option<(reqwest::Client, Url)>,
}

impl SubmissionGateway {
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        let upstream = match &config.upstream_url {
            Some(raw) => {
                let url = Url::parse(raw).map_err(|e| ServerError::InvalidUpstreamUrl {
                    url: raw.clone(),
                    message: e.to_string(),
                })?;
                Some((reqwest::Client::builder().build()?, url))
            }
            None => None,
        };

        Ok(Self {
            worker_program: config.worker_program.clone(),
            poll_script: config.poll_script.clone(),
            stream_script: config.stream_script.clone(),
            worker_env: config.worker_env.clone(),
            forward_min_distance: config.forward_min_distance,
            min_budget: config.min_budget,
            upstream,
        })
    }

    pub fn min_budget(&self) -> f64 {
        self.min_budget
    }

    pub fn is_relay(&self) -> bool {
        self.upstream.is_some()
    }

    /// Check required fields and thresholds. Nothing is spawned for a
    /// rejected request.
    pub fn validate(&self, request: &OptimizationRequest) -> Result<ValidatedRequest, CoreError> {
        request.validate(self.min_budget)
    }

    /// Worker argument vector, script first.
    pub fn worker_args(&self, request: &ValidatedRequest, mode: ConsumptionMode) -> Vec<String> {
        let mut args = vec![
            self.script(mode).display().to_string(),
            "--domain".to_string(),
            request.domain.clone(),
            "--budget".to_string(),
            request.budget.to_string(),
        ];
        if let Some(max_locations) = request.max_locations {
            args.push("--max-locations".to_string());
            args.push(max_locations.to_string());
        }
        if let Some(distance) = request
            .min_distance_between_banks
            .filter(|_| self.forward_min_distance)
        {
            args.push("--min-distance".to_string());
            args.push(distance.to_string());
        }
        args
    }

    /// Full worker command line and environment.
    pub fn command(&self, request: &ValidatedRequest, mode: ConsumptionMode) -> WorkerCommand {
        let mut command = WorkerCommand::new(&self.worker_program)
            .args(self.worker_args(request, mode))
            .env("PYTHONUNBUFFERED", "1");

        if let Some(dir) = script_dir(self.script(mode)) {
            command = command.env("PYTHONPATH", dir.display().to_string());
        }
        for (key, value) in &self.worker_env {
            command = command.env(key, value);
        }
        command
    }

    /// Relay target for a request: the upstream URL with the request as its
    /// query string.
    pub fn relay_url(&self, base: &Url, request: &ValidatedRequest) -> Url {
        let mut url = base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("domain", &request.domain);
            query.append_pair("budget", &request.budget.to_string());
            if let Some(max_locations) = request.max_locations {
                query.append_pair("maxLocations", &max_locations.to_string());
            }
            if let Some(distance) = request.min_distance_between_banks {
                query.append_pair("minDistanceBetweenBanks", &distance.to_string());
            }
        }
        url
    }

    /// Where the session for this request should read from.
    pub fn source(&self, request: &ValidatedRequest, mode: ConsumptionMode) -> SessionSource {
        match &self.upstream {
            Some((client, base)) => {
                let url = self.relay_url(base, request);
                debug!(url = %url, "Relaying submission upstream");
                SessionSource::Relay {
                    client: client.clone(),
                    url,
                }
            }
            None => SessionSource::Process(self.command(request, mode)),
        }
    }

    fn script(&self, mode: ConsumptionMode) -> &Path {
        match mode {
            ConsumptionMode::Poll => &self.poll_script,
            ConsumptionMode::Stream => &self.stream_script,
        }
    }
}

fn script_dir(script: &Path) -> Option<&Path> {
    script.parent().filter(|dir| !dir.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> SubmissionGateway {
        let config = Config {
            worker_env: vec![("MONGODB_DB".to_string(), "foodmap".to_string())],
            ..Config::default()
        };
        SubmissionGateway::new(&config).unwrap()
    }

    fn request(budget: f64) -> OptimizationRequest {
        OptimizationRequest {
            domain: Some("la_central".to_string()),
            budget: Some(budget),
            ..Default::default()
        }
    }

    #[test]
    fn test_low_budget_rejected() {
        let err = gateway().validate(&request(100.0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidField { field: "budget", .. }));
    }

    #[test]
    fn test_stream_args() {
        let gateway = gateway();
        let valid = gateway.validate(&request(750_000.0)).unwrap();
        assert_eq!(
            gateway.worker_args(&valid, ConsumptionMode::Stream),
            [
                "agents/location_agent/run_optimization_stream.py",
                "--domain",
                "la_central",
                "--budget",
                "750000"
            ]
        );
    }

    #[test]
    fn test_optional_args_and_env() {
        let gateway = gateway();
        let mut raw = request(600_000.0);
        raw.max_locations = Some(5);
        raw.min_distance_between_banks = Some(1.5);
        let valid = gateway.validate(&raw).unwrap();

        let command = gateway.command(&valid, ConsumptionMode::Poll);
        assert_eq!(command.program(), "python3");
        assert_eq!(
            command.get_args()[0],
            "agents/location_agent/run_optimization.py"
        );
        assert!(command
            .get_args()
            .windows(2)
            .any(|w| w == ["--max-locations", "5"]));
        assert!(command
            .get_args()
            .windows(2)
            .any(|w| w == ["--min-distance", "1.5"]));

        let env = command.get_env();
        assert!(env.contains(&("PYTHONUNBUFFERED".to_string(), "1".to_string())));
        assert!(env.contains(&(
            "PYTHONPATH".to_string(),
            "agents/location_agent".to_string()
        )));
        assert!(env.contains(&("MONGODB_DB".to_string(), "foodmap".to_string())));
    }

    #[test]
    fn test_min_distance_not_forwarded_when_disabled() {
        let config = Config {
            forward_min_distance: false,
            ..Config::default()
        };
        let gateway = SubmissionGateway::new(&config).unwrap();
        let mut raw = request(600_000.0);
        raw.min_distance_between_banks = Some(1.5);
        let valid = gateway.validate(&raw).unwrap();

        let args = gateway.worker_args(&valid, ConsumptionMode::Poll);
        assert!(!args.iter().any(|a| a == "--min-distance"));
        assert_eq!(
            args,
            [
                "agents/location_agent/run_optimization.py",
                "--domain",
                "la_central",
                "--budget",
                "600000"
            ]
        );
    }

    #[test]
    fn test_relay_source() {
        let config = Config {
            upstream_url: Some("http://127.0.0.1:8000/api/optimize/stream".to_string()),
            ..Config::default()
        };
        let gateway = SubmissionGateway::new(&config).unwrap();
        assert!(gateway.is_relay());

        let valid = gateway.validate(&request(750_000.0)).unwrap();
        match gateway.source(&valid, ConsumptionMode::Stream) {
            SessionSource::Relay { url, .. } => {
                assert_eq!(
                    url.as_str(),
                    "http://127.0.0.1:8000/api/optimize/stream?domain=la_central&budget=750000"
                );
            }
            other => panic!("Expected relay source, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_upstream_url() {
        let config = Config {
            upstream_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            SubmissionGateway::new(&config),
            Err(ServerError::InvalidUpstreamUrl { .. })
        ));
    }
}
