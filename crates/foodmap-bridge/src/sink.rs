//! Consumers of session events.
//!
//! A session reports to exactly one [`SessionSink`]. Poll mode attaches a
//! registry writer, stream mode a client forwarder; both see the same
//! sequence of callbacks.

use async_trait::async_trait;
use foodmap_core::{SessionState, StreamEvent};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::BridgeError;

/// Callbacks invoked by a running session.
///
/// Ordering guarantees:
/// - `on_state` is called for every state transition, in order.
/// - `on_event` receives non-terminal events in arrival order.
/// - `on_terminal` is called exactly once, with a `Result` or `Error`.
/// - `on_exit` is called once, after `on_terminal`.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Called when the session changes state.
    async fn on_state(&self, _state: SessionState) {}

    /// Called for each non-terminal event.
    async fn on_event(&self, event: StreamEvent) -> Result<(), BridgeError>;

    /// Called once with the event that ends the session.
    async fn on_terminal(&self, event: StreamEvent) -> Result<(), BridgeError>;

    /// Called once the source has ended. `code` is the worker's exit code
    /// when there is one.
    async fn on_exit(&self, _code: Option<i32>) {}
}

/// Everything a sink can observe, as a single value.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(SessionState),
    Event(StreamEvent),
    Terminal(StreamEvent),
    Exit(Option<i32>),
}

/// A sink that forwards every callback into an unbounded channel.
///
/// Useful for tests and for consumers that prefer a pull-based feed.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a new sink and the receiver for its feed.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SessionEvent) -> Result<(), BridgeError> {
        trace!(?event, "Forwarding session event");
        self.tx.send(event).map_err(|_| BridgeError::ChannelClosed)
    }
}

#[async_trait]
impl SessionSink for ChannelSink {
    async fn on_state(&self, state: SessionState) {
        // Receiver might be dropped
        self.send(SessionEvent::State(state)).ok();
    }

    async fn on_event(&self, event: StreamEvent) -> Result<(), BridgeError> {
        self.send(SessionEvent::Event(event))
    }

    async fn on_terminal(&self, event: StreamEvent) -> Result<(), BridgeError> {
        self.send(SessionEvent::Terminal(event))
    }

    async fn on_exit(&self, code: Option<i32>) {
        self.send(SessionEvent::Exit(code)).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_state(SessionState::Spawning).await;
        sink.on_event(StreamEvent::Phase {
            label: "starting".to_string(),
        })
        .await
        .unwrap();
        sink.on_terminal(StreamEvent::error("boom")).await.unwrap();
        sink.on_exit(Some(1)).await;

        assert_eq!(rx.recv().await, Some(SessionEvent::State(SessionState::Spawning)));
        assert!(matches!(rx.recv().await, Some(SessionEvent::Event(_))));
        assert!(matches!(rx.recv().await, Some(SessionEvent::Terminal(_))));
        assert_eq!(rx.recv().await, Some(SessionEvent::Exit(Some(1))));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let result = sink.on_event(StreamEvent::Connected).await;
        assert!(matches!(result, Err(BridgeError::ChannelClosed)));
    }
}
