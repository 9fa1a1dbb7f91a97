//! Live event streams for stream-mode clients.
//!
//! Each client gets its own channel fed by a [`ForwardingSink`]. The channel
//! always opens with `Connected` and closes with `Complete`. `agent_step`
//! events are held back by `agent_step_delay` so the dashboard can animate
//! them; every other event is forwarded as it arrives. Dropping the
//! [`ClientStream`] cancels the session and kills its worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use foodmap_bridge::{BridgeError, SessionSink};
use foodmap_core::{SessionState, StreamEvent};
use futures_util::stream::{self, Stream};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::gateway::SessionSource;

/// One item pushed to a streaming client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(StreamEvent),
    KeepAlive,
}

/// Attaches sessions to client streams.
#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    agent_step_delay: Duration,
    keepalive_interval: Duration,
    active: Arc<AtomicUsize>,
}

impl StreamMultiplexer {
    pub fn new(agent_step_delay: Duration, keepalive_interval: Duration) -> Self {
        Self {
            agent_step_delay,
            keepalive_interval,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of client streams currently open.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Start `source` and return the client's side of its event stream.
    ///
    /// A source that fails to start still yields a stream carrying its
    /// `Error` and the closing `Complete`.
    pub async fn attach(&self, source: SessionSource) -> ClientStream {
        let (sink, mut stream) = self.open();
        match source.start(sink).await {
            Ok(handle) => {
                stream.guard = Some(handle.cancel_on_drop());
                stream.state = Some(handle.subscribe_state());
            }
            Err(e) => warn!(error = %e, "Stream session failed to start"),
        }
        stream
    }

    /// Create a connected sink/stream pair without a session.
    pub fn open(&self) -> (Arc<ForwardingSink>, ClientStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive; cannot fail.
        tx.send(ClientMessage::Event(StreamEvent::Connected)).ok();

        let keepalive_stop = CancellationToken::new();
        spawn_keepalive(tx.clone(), self.keepalive_interval, keepalive_stop.clone());

        let sink = Arc::new(ForwardingSink {
            tx,
            agent_step_delay: self.agent_step_delay,
            debounce: TaskTracker::new(),
            keepalive_stop,
            disconnected: AtomicBool::new(false),
        });

        self.active.fetch_add(1, Ordering::Relaxed);
        let stream = ClientStream {
            rx,
            guard: None,
            state: None,
            finished: false,
            active: ActiveStream(self.active.clone()),
        };
        (sink, stream)
    }
}

fn spawn_keepalive(
    tx: mpsc::UnboundedSender<ClientMessage>,
    period: Duration,
    stop: CancellationToken,
) {
    if period.is_zero() {
        debug!("Keepalive disabled");
        return;
    }
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tx.closed() => break,
                _ = ticks.tick() => {
                    if tx.send(ClientMessage::KeepAlive).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Keepalive stopped");
    });
}

/// Session sink that forwards events to one client.
pub struct ForwardingSink {
    tx: mpsc::UnboundedSender<ClientMessage>,
    agent_step_delay: Duration,
    debounce: TaskTracker,
    keepalive_stop: CancellationToken,
    disconnected: AtomicBool,
}

impl ForwardingSink {
    fn push(&self, event: StreamEvent) -> Result<(), BridgeError> {
        if self.tx.send(ClientMessage::Event(event)).is_err() {
            if !self.disconnected.swap(true, Ordering::Relaxed) {
                info!("Stream client disconnected");
            }
            return Err(BridgeError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionSink for ForwardingSink {
    async fn on_event(&self, event: StreamEvent) -> Result<(), BridgeError> {
        if !matches!(event, StreamEvent::AgentStep { .. }) {
            return self.push(event);
        }
        if self.tx.is_closed() {
            return Err(BridgeError::ChannelClosed);
        }

        let tx = self.tx.clone();
        let delay = self.agent_step_delay;
        self.debounce.spawn(async move {
            tokio::time::sleep(delay).await;
            // Client may have left in the meantime.
            tx.send(ClientMessage::Event(event)).ok();
        });
        Ok(())
    }

    async fn on_terminal(&self, event: StreamEvent) -> Result<(), BridgeError> {
        self.keepalive_stop.cancel();
        self.push(event)
    }

    async fn on_exit(&self, code: Option<i32>) {
        self.keepalive_stop.cancel();
        self.debounce.close();
        self.debounce.wait().await;
        debug!(exit_code = ?code, "Closing client stream");
        self.push(StreamEvent::Complete).ok();
    }
}

/// Decrements the open-stream count when the client stream goes away.
#[derive(Debug)]
struct ActiveStream(Arc<AtomicUsize>);

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The client's side of a session's event stream.
pub struct ClientStream {
    rx: mpsc::UnboundedReceiver<ClientMessage>,
    guard: Option<DropGuard>,
    state: Option<watch::Receiver<SessionState>>,
    finished: bool,
    active: ActiveStream,
}

impl ClientStream {
    /// Next message, or `None` after `Complete`.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        if self.finished {
            return None;
        }
        let message = self.rx.recv().await;
        if matches!(
            message,
            None | Some(ClientMessage::Event(StreamEvent::Complete))
        ) {
            self.finished = true;
        }
        message
    }

    /// Session state changes, when a session is attached.
    pub fn subscribe_state(&self) -> Option<watch::Receiver<SessionState>> {
        self.state.clone()
    }

    /// Adapt into a `Stream`. Dropping the stream disconnects the client.
    pub fn into_stream(self) -> impl Stream<Item = ClientMessage> + Send {
        stream::unfold(self, |mut client| async move {
            let message = client.recv().await?;
            Some((message, client))
        })
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if !self.finished && self.guard.is_some() {
            info!(active = self.active.0.load(Ordering::Relaxed), "Client stream dropped, cancelling session");
        }
    }
}
