//! Sentinel-delimited result blocks.
//!
//! A worker whose final payload is too large for one protocol line prints it
//! between two marker lines:
//!
//! ```text
//! FINAL_RESULT_START
//! {"locations":[...],"total_people_served":4200}
//! FINAL_RESULT_END
//! ```
//!
//! The lines in between are joined with no delimiter, so the payload must be
//! a serialization that stays valid when its line breaks are removed (compact
//! JSON is).

use foodmap_core::StreamEvent;
use serde_json::Value;
use tracing::{debug, warn};

/// Marker that opens a result block.
pub const RESULT_BEGIN: &str = "FINAL_RESULT_START";

/// Marker that closes a result block.
pub const RESULT_END: &str = "FINAL_RESULT_END";

/// A sentinel marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Begin,
    End,
}

impl Sentinel {
    /// Classify a line as a marker. Anything else on a marker line is ignored.
    pub fn parse(line: &str) -> Option<Sentinel> {
        if line.contains(RESULT_BEGIN) {
            Some(Sentinel::Begin)
        } else if line.contains(RESULT_END) {
            Some(Sentinel::End)
        } else {
            None
        }
    }
}

/// What the collector did with one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    /// Not part of a block; hand the line to the message parser.
    Line(String),
    /// Marker or payload line, absorbed by the collector.
    Consumed,
    /// A block just closed.
    Event(StreamEvent),
}

/// Reassembles sentinel-delimited blocks from a line sequence.
#[derive(Debug, Default)]
pub struct ResultBlockCollector {
    /// `Some` while collecting.
    block: Option<String>,
}

impl ResultBlockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_collecting(&self) -> bool {
        self.block.is_some()
    }

    /// Feed the next line.
    pub fn feed(&mut self, line: String) -> Collected {
        match (Sentinel::parse(&line), self.block.as_mut()) {
            (Some(Sentinel::Begin), current) => {
                if let Some(partial) = current {
                    warn!(
                        discarded_bytes = partial.len(),
                        "Result block restarted before it was closed"
                    );
                }
                debug!("Result block started");
                self.block = Some(String::new());
                Collected::Consumed
            }
            (Some(Sentinel::End), Some(_)) => {
                let payload = self.block.take().unwrap_or_default();
                Collected::Event(parse_block(&payload))
            }
            (Some(Sentinel::End), None) => {
                warn!("Result block end marker without a start marker");
                Collected::Consumed
            }
            (None, Some(buffer)) => {
                buffer.push_str(&line);
                Collected::Consumed
            }
            (None, None) => Collected::Line(line),
        }
    }

    /// End of stream. An unterminated block is reported and discarded.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let partial = self.block.take()?;
        warn!(
            discarded_bytes = partial.len(),
            "Output ended inside a result block"
        );
        Some(StreamEvent::error(
            "result block was not terminated before end of output",
        ))
    }
}

fn parse_block(payload: &str) -> StreamEvent {
    match serde_json::from_str::<Value>(payload) {
        Ok(payload) => {
            debug!("Result block parsed");
            StreamEvent::Result { payload }
        }
        Err(e) => {
            let preview: String = payload.chars().take(200).collect();
            warn!(error = %e, preview = %preview, "Failed to parse result block");
            StreamEvent::error(format!("failed to parse result block: {}", e))
        }
    }
}
