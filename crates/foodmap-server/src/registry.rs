//! In-memory job registry for poll mode.
//!
//! Jobs are inserted as Pending before their worker is spawned, so a status
//! request issued right after submission never sees "not found". Entries are
//! never removed; the map lives as long as the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use foodmap_bridge::{BridgeError, SessionSink};
use foodmap_core::{CoreError, Job, JobId, JobStatus, JobView, SessionState, StreamEvent};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::gateway::SessionSource;

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Shared map of submitted jobs.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and start its session.
    ///
    /// The returned id is queryable immediately, even if the worker fails to
    /// spawn (the job is then already Failed).
    pub async fn submit(&self, job: Job, source: SessionSource) -> JobId {
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            domain = %job.domain,
            budget = job.budget,
            "Job submitted"
        );
        self.jobs.write().await.insert(job_id.clone(), job);

        let sink = Arc::new(RegistrySink {
            registry: self.clone(),
            job_id: job_id.clone(),
        });
        if let Err(e) = source.start(sink).await {
            warn!(job_id = %job_id, error = %e, "Job session failed to start");
        }
        job_id
    }

    /// Current wire view of a job.
    pub async fn status(&self, job_id: &JobId) -> Result<JobView, RegistryError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(Job::view)
            .ok_or_else(|| RegistryError::NotFound(job_id.clone()))
    }

    /// Snapshot of one job.
    pub async fn get(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().await;
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status() {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    async fn update<F>(&self, job_id: &JobId, apply: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), CoreError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        apply(job)
    }
}

/// Writes one session's outcome into its job entry. The only writer of that
/// job's terminal state.
pub struct RegistrySink {
    registry: JobRegistry,
    job_id: JobId,
}

#[async_trait]
impl SessionSink for RegistrySink {
    async fn on_state(&self, state: SessionState) {
        if state == SessionState::Streaming {
            let result = self
                .registry
                .update(&self.job_id, |job| {
                    job.mark_running();
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                warn!(job_id = %self.job_id, error = %e, "Failed to mark job running");
            } else {
                info!(job_id = %self.job_id, "Job running");
            }
        }
    }

    async fn on_event(&self, event: StreamEvent) -> Result<(), BridgeError> {
        debug!(job_id = %self.job_id, message_type = event.kind(), "Job progress");
        Ok(())
    }

    async fn on_terminal(&self, event: StreamEvent) -> Result<(), BridgeError> {
        let result = match event {
            StreamEvent::Result { payload } => {
                info!(job_id = %self.job_id, "Job completed");
                self.registry
                    .update(&self.job_id, |job| job.complete(payload))
                    .await
            }
            StreamEvent::Error { message } => {
                warn!(job_id = %self.job_id, error = %message, "Job failed");
                self.registry
                    .update(&self.job_id, |job| job.fail(message))
                    .await
            }
            other => {
                return Err(BridgeError::ProtocolError(format!(
                    "unexpected terminal event: {}",
                    other.kind()
                )))
            }
        };
        if let Err(e) = result {
            warn!(job_id = %self.job_id, error = %e, "Failed to record job outcome");
        }
        Ok(())
    }

    async fn on_exit(&self, code: Option<i32>) {
        debug!(job_id = %self.job_id, exit_code = ?code, "Job session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::{ConsumptionMode, SubmissionGateway};
    use foodmap_bridge::WorkerCommand;
    use foodmap_core::OptimizationRequest;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn sh(script: &str) -> SessionSource {
        SessionSource::Process(WorkerCommand::new("sh").arg("-c").arg(script))
    }

    async fn wait_terminal(registry: &JobRegistry, job_id: &JobId) -> JobView {
        for _ in 0..500 {
            let view = registry.status(job_id).await.unwrap();
            if view != JobView::InProgress {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    /// Worker script with strict flag parsing that prints its outcome as a
    /// single `{"status": ...}` line.
    fn one_shot_worker(accepted_flags: &str) -> NamedTempFile {
        let mut script = NamedTempFile::new().unwrap();
        write!(
            script,
            r#"
while [ $# -gt 0 ]; do
    case "$1" in
        {accepted_flags}) shift 2 ;;
        *) echo "usage: run_optimization.py: error: unrecognized arguments: $*" >&2; exit 2 ;;
    esac
done
echo "Loading domain data..."
printf '%s\n' '{{"status": "success", "locations": [], "total_people_served": 4200}}'
"#
        )
        .unwrap();
        script
    }

    async fn run_poll_job(config: Config, min_distance: Option<f64>) -> JobView {
        let gateway = SubmissionGateway::new(&config).unwrap();
        let request = OptimizationRequest {
            domain: Some("la_central".to_string()),
            budget: Some(750_000.0),
            min_distance_between_banks: min_distance,
            ..Default::default()
        };
        let valid = gateway.validate(&request).unwrap();

        let registry = JobRegistry::new();
        let job_id = registry
            .submit(
                Job::new(valid.domain.clone(), valid.budget),
                gateway.source(&valid, ConsumptionMode::Poll),
            )
            .await;
        wait_terminal(&registry, &job_id).await
    }

    #[tokio::test]
    async fn test_one_shot_status_line_completes_job() {
        let script = one_shot_worker("--domain|--budget|--max-locations|--min-distance");
        let config = Config {
            worker_program: "sh".to_string(),
            poll_script: script.path().to_path_buf(),
            ..Config::default()
        };

        assert_eq!(
            run_poll_job(config, Some(0.5)).await,
            JobView::Success {
                data: json!({
                    "status": "success",
                    "locations": [],
                    "total_people_served": 4200
                })
            }
        );
    }

    #[tokio::test]
    async fn test_min_distance_withheld_from_workers_without_the_flag() {
        let script = one_shot_worker("--domain|--budget|--max-locations");
        let config = Config {
            worker_program: "sh".to_string(),
            poll_script: script.path().to_path_buf(),
            ..Config::default()
        };

        match run_poll_job(config.clone(), Some(0.5)).await {
            JobView::Error { error } => assert!(error.contains("unrecognized arguments")),
            other => panic!("Expected usage error, got {:?}", other),
        }

        let config = Config {
            forward_min_distance: false,
            ..config
        };
        assert!(matches!(
            run_poll_job(config, Some(0.5)).await,
            JobView::Success { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let registry = JobRegistry::new();
        let result = registry.status(&JobId::new("missing")).await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_successful_job() {
        let registry = JobRegistry::new();
        let job_id = registry
            .submit(
                Job::new("la_central", 750_000.0),
                sh(r#"
                    echo FINAL_RESULT_START
                    printf '%s\n' '{"total_people_served":4200}'
                    echo FINAL_RESULT_END
                "#),
            )
            .await;

        assert_eq!(
            wait_terminal(&registry, &job_id).await,
            JobView::Success {
                data: json!({"total_people_served": 4200})
            }
        );
        let job = registry.get(&job_id).await.unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.finished_at().is_some());
    }

    #[tokio::test]
    async fn test_fast_failing_job_is_queryable() {
        let registry = JobRegistry::new();
        let job_id = registry
            .submit(Job::new("la_central", 750_000.0), sh("exit 2"))
            .await;

        // Visible immediately, whatever state it is in.
        assert!(registry.status(&job_id).await.is_ok());
        assert_eq!(
            wait_terminal(&registry, &job_id).await,
            JobView::Error {
                error: "process exited with code 2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let registry = JobRegistry::new();
        let source = SessionSource::Process(WorkerCommand::new("/nonexistent/foodmap-worker"));
        let job_id = registry
            .submit(Job::new("la_central", 750_000.0), source)
            .await;

        match registry.status(&job_id).await.unwrap() {
            JobView::Error { error } => assert!(error.contains("Failed to spawn")),
            other => panic!("Expected error view, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_counts() {
        let registry = JobRegistry::new();
        let ok = registry
            .submit(
                Job::new("a", 500_000.0),
                sh(r#"printf '%s\n' '{"type":"result","data":{}}'"#),
            )
            .await;
        let bad = registry
            .submit(Job::new("b", 500_000.0), sh("exit 1"))
            .await;
        wait_terminal(&registry, &ok).await;
        wait_terminal(&registry, &bad).await;

        let counts = registry.counts().await;
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending + counts.running, 0);
        assert_eq!(registry.len().await, 2);
    }
}
