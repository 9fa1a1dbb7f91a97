//! Job type and its client-facing snapshot.

use crate::{CoreError, JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Job represents one submitted optimization request and its lifecycle.
///
/// `result` is set iff the job is Completed and `error` is set iff it is
/// Failed. The fields are private so that the transition methods are the only
/// way to reach a terminal state, and they refuse to leave one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,

    /// Domain (region) the optimization runs over.
    pub domain: String,

    /// Budget in the dashboard's currency units.
    pub budget: f64,

    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,

    status: JobStatus,
    result: Option<Value>,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new Pending job.
    pub fn new(domain: impl Into<String>, budget: f64) -> Self {
        Self {
            id: JobId::generate(),
            domain: domain.into(),
            budget,
            submitted_at: Utc::now(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Mark the job as running. A no-op unless the job is Pending.
    pub fn mark_running(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
        }
    }

    /// Mark the job as completed with the worker's result payload.
    pub fn complete(&mut self, result: Value) -> Result<(), CoreError> {
        self.ensure_active(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the job as failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.ensure_active(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Snapshot for status queries.
    pub fn view(&self) -> JobView {
        match (self.status, &self.result, &self.error) {
            (JobStatus::Completed, Some(data), _) => JobView::Success { data: data.clone() },
            (JobStatus::Failed, _, Some(error)) => JobView::Error {
                error: error.clone(),
            },
            _ => JobView::InProgress,
        }
    }

    fn ensure_active(&self, to: JobStatus) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", to),
            });
        }
        Ok(())
    }
}

/// Client-facing job status, as returned by the poll endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobView {
    /// Pending or Running.
    InProgress,
    Error { error: String },
    Success { data: Value },
}
