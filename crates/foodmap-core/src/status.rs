//! Status enums for Jobs and worker sessions.

use serde::{Deserialize, Serialize};

/// Status of a Job in the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job created; the worker may not have produced output yet.
    #[default]
    Pending,
    /// Worker has started producing output.
    Running,
    /// Worker delivered a result.
    Completed,
    /// Worker failed, crashed, or exited without a result.
    Failed,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Lifecycle of one worker session, shared by poll and stream mode.
///
/// `Created -> Spawning -> Streaming -> {Completed, Failed}`. Both terminal
/// states are absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Created,
    Spawning,
    /// At least one output line has been observed.
    Streaming,
    Completed,
    Failed,
}

impl SessionState {
    /// Returns true if the session is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Created, Spawning) => true,
            (Spawning, Streaming) => true,
            // A worker may fail (or be cancelled) before printing anything.
            (Created | Spawning | Streaming, Completed | Failed) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_session_transitions() {
        assert!(SessionState::Created.can_transition_to(SessionState::Spawning));
        assert!(SessionState::Spawning.can_transition_to(SessionState::Streaming));
        assert!(SessionState::Streaming.can_transition_to(SessionState::Completed));
        assert!(SessionState::Spawning.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Streaming.can_transition_to(SessionState::Spawning));
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for next in [
            SessionState::Created,
            SessionState::Spawning,
            SessionState::Streaming,
            SessionState::Completed,
            SessionState::Failed,
        ] {
            assert!(!SessionState::Completed.can_transition_to(next));
            assert!(!SessionState::Failed.can_transition_to(next));
        }
    }
}
