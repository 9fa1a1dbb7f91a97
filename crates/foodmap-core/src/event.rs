//! Events flowing from an optimization worker to web clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A discriminated message flowing through the bridge.
///
/// The wire form is one JSON object carrying a `type` field. Field names on
/// the wire follow what the worker prints (`content`, `function`, `phase`,
/// `error`, `data`); extra fields such as the worker's `timestamp` are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Sent once to a streaming client when its channel opens.
    Connected,

    /// Coarse progress label ("Optimizing warehouse locations...").
    Phase {
        #[serde(rename = "phase")]
        label: String,
    },

    /// Free-form narration from the agent.
    AgentMessage {
        #[serde(rename = "content")]
        text: String,
    },

    /// The agent invoked one of its tools.
    FunctionCall {
        #[serde(rename = "function")]
        name: String,
        #[serde(default)]
        args: Value,
    },

    /// A tool invocation finished.
    FunctionResult {
        #[serde(rename = "function")]
        name: String,
        #[serde(default)]
        result: Value,
    },

    /// Structured step report (agent, step, status, message, input/output).
    AgentStep {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },

    /// Error report. Terminal when printed by the worker on stdout.
    Error {
        #[serde(rename = "error", alias = "message")]
        message: String,
    },

    /// Final optimization result. Always terminal.
    Result {
        #[serde(rename = "data")]
        payload: Value,
    },

    /// Sent once to a streaming client after the session has ended.
    Complete,
}

impl StreamEvent {
    /// Build an `Error` event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire discriminator of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Phase { .. } => "phase",
            Self::AgentMessage { .. } => "agent_message",
            Self::FunctionCall { .. } => "function_call",
            Self::FunctionResult { .. } => "function_result",
            Self::AgentStep { .. } => "agent_step",
            Self::Error { .. } => "error",
            Self::Result { .. } => "result",
            Self::Complete => "complete",
        }
    }

    /// Returns true for the two variants that can end a session.
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }

    /// Whether a worker may emit this discriminator.
    ///
    /// `connected` and `complete` are produced by the bridge itself.
    pub fn is_worker_kind(kind: &str) -> bool {
        matches!(
            kind,
            "phase"
                | "agent_message"
                | "function_call"
                | "function_result"
                | "agent_step"
                | "error"
                | "result"
        )
    }
}
