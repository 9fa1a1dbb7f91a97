//! Relaying another bridge's event stream.
//!
//! In the double-relay deployment the public server does not spawn workers
//! itself; it subscribes to an upstream bridge's SSE endpoint and feeds the
//! `data:` payloads through the same decoding pipeline a local worker's
//! stdout would take.

use std::sync::Arc;

use foodmap_core::SessionState;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decoder::OutputDecoder;
use crate::error::BridgeError;
use crate::framer::LineFramer;
use crate::session::{SessionDriver, SessionHandle, CANCELLED_MESSAGE};
use crate::sink::SessionSink;

/// Message used when the upstream stream ends without an outcome.
pub const UPSTREAM_CLOSED_MESSAGE: &str = "upstream closed without producing a result";

/// A session whose events come from an upstream SSE endpoint.
pub struct RelaySession;

impl RelaySession {
    /// Subscribe to `url` and stream its events into `sink`.
    ///
    /// Connection failures are reported to the sink as the terminal `Error`.
    pub fn start(client: reqwest::Client, url: String, sink: Arc<dyn SessionSink>) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let driver = SessionDriver::new(sink, state_tx);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(relay(client, url, driver, cancel.clone()));
        SessionHandle::from_parts(cancel, state_rx, task)
    }
}

async fn relay(
    client: reqwest::Client,
    url: String,
    mut driver: SessionDriver,
    cancel: CancellationToken,
) {
    driver.transition(SessionState::Spawning).await;
    info!(url = %url, "Connecting to upstream stream");

    let response = tokio::select! {
        response = connect(&client, &url) => response,
        _ = cancel.cancelled() => {
            driver.close(None, CANCELLED_MESSAGE.to_string()).await;
            return;
        }
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "Upstream connection failed");
            driver.close(None, e.to_string()).await;
            return;
        }
    };

    let mut body = response.bytes_stream();
    let mut framer = LineFramer::new();
    let mut decoder = OutputDecoder::new();

    loop {
        let chunk = tokio::select! {
            chunk = body.next() => chunk,
            _ = cancel.cancelled() => {
                driver.close(None, CANCELLED_MESSAGE.to_string()).await;
                return;
            }
        };

        let lines = match chunk {
            Some(Ok(bytes)) => framer.push(&bytes),
            Some(Err(e)) => {
                warn!(error = %e, "Upstream stream failed");
                let message = BridgeError::Relay(e).to_string();
                driver.close(None, message).await;
                return;
            }
            None => break,
        };

        driver.observe_output().await;
        for line in lines {
            let Some(data) = sse_data(&line) else {
                continue;
            };
            if let Some(decoded) = decoder.decode_line(data.to_string()) {
                driver.deliver(decoded).await;
            }
        }
    }

    if let Some(data) = framer.finish().as_deref().and_then(sse_data) {
        if let Some(decoded) = decoder.decode_line(data.to_string()) {
            driver.deliver(decoded).await;
        }
    }
    if let Some(decoded) = decoder.finish() {
        driver.deliver(decoded).await;
    }

    debug!(
        messages = decoder.parser().message_count(),
        "Upstream stream ended"
    );
    let message = driver
        .first_error()
        .map(str::to_owned)
        .unwrap_or_else(|| UPSTREAM_CLOSED_MESSAGE.to_string());
    driver.close(None, message).await;
}

async fn connect(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, BridgeError> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?;
    Ok(response.error_for_status()?)
}

/// Payload of an SSE `data:` field line. Comments, other fields and blank
/// separators yield `None`.
pub fn sse_data(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, SessionEvent};
    use foodmap_core::StreamEvent;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP response with `body` and close the connection.
    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\n\
                Content-Type: text/event-stream\r\n\
                Connection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}/api/optimize/stream", addr)
    }

    async fn relay_events(url: String) -> Vec<SessionEvent> {
        let (sink, mut rx) = ChannelSink::new();
        let handle = RelaySession::start(reqwest::Client::new(), url, Arc::new(sink));
        handle.wait().await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_sse_data() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data(": keepalive"), None);
        assert_eq!(sse_data("event: message"), None);
        assert_eq!(sse_data(""), None);
    }

    #[tokio::test]
    async fn test_relays_upstream_events() {
        let url = serve_once(
            "data: {\"type\":\"connected\"}\n\n\
             : keepalive\n\n\
             data: {\"type\":\"phase\",\"phase\":\"optimizing\"}\n\n\
             data: {\"type\":\"result\",\"data\":{\"total_people_served\":4200}}\n\n\
             data: {\"type\":\"complete\"}\n\n",
        )
        .await;

        let events = relay_events(url).await;
        assert!(events.contains(&SessionEvent::Event(StreamEvent::Phase {
            label: "optimizing".to_string()
        })));
        assert!(events.contains(&SessionEvent::Terminal(StreamEvent::Result {
            payload: json!({"total_people_served": 4200})
        })));
        assert_eq!(events.last(), Some(&SessionEvent::Exit(None)));
    }

    #[tokio::test]
    async fn test_upstream_close_without_result_fails() {
        let url = serve_once("data: {\"type\":\"connected\"}\n\n").await;
        let events = relay_events(url).await;
        assert!(events.contains(&SessionEvent::Terminal(StreamEvent::error(
            UPSTREAM_CLOSED_MESSAGE
        ))));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let events = relay_events(format!("http://{}/", addr)).await;
        let terminal = events.iter().find_map(|e| match e {
            SessionEvent::Terminal(event) => Some(event),
            _ => None,
        });
        assert!(matches!(terminal, Some(StreamEvent::Error { .. })));
        assert!(events.contains(&SessionEvent::State(SessionState::Failed)));
    }
}
