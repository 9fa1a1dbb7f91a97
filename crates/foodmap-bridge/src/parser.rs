//! Classification of worker output lines.
//!
//! Every stdout line that is not part of a result block is either a protocol
//! message (a JSON object with a `type` discriminator) or diagnostic noise.
//! Stderr is only scanned for error-severity log lines.

use foodmap_core::StreamEvent;
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Severity marker that promotes a stderr line to an `Error` event.
const ERROR_MARKER: &str = "ERROR";

/// Severity marker that vetoes promotion.
const INFO_MARKER: &str = "INFO";

/// Classification of one stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// A protocol message.
    Event(StreamEvent),
    /// Free text (progress bars, prints, blank lines).
    Diagnostic,
    /// JSON that was malformed or carried an unknown discriminator.
    Ignored,
}

/// Parses worker output lines into [`StreamEvent`]s.
#[derive(Debug, Default)]
pub struct MessageParser {
    message_count: u64,
    skipped_count: u64,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of protocol messages parsed so far.
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Number of JSON-looking lines that were skipped.
    pub fn skipped_count(&self) -> u64 {
        self.skipped_count
    }

    /// Classify one stdout line.
    pub fn parse_stdout(&mut self, line: &str) -> ParsedLine {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            if !trimmed.is_empty() {
                trace!(line = %trimmed, "Worker diagnostic output");
            }
            return ParsedLine::Diagnostic;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                self.skip(&e.to_string(), trimmed);
                return ParsedLine::Ignored;
            }
        };

        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let parsed = match kind.as_deref() {
            Some(kind) if StreamEvent::is_worker_kind(kind) => {
                match serde_json::from_value::<StreamEvent>(value) {
                    Ok(event) => ParsedLine::Event(event),
                    Err(e) => {
                        self.skip(&e.to_string(), trimmed);
                        return ParsedLine::Ignored;
                    }
                }
            }
            Some(kind) => {
                debug!(message_type = %kind, "Ignoring unknown worker message type");
                ParsedLine::Ignored
            }
            None => legacy_status_object(value),
        };

        if let ParsedLine::Event(event) = &parsed {
            self.message_count += 1;
            debug!(
                message_num = self.message_count,
                message_type = event.kind(),
                "Parsed worker message"
            );
        }
        parsed
    }

    /// Scan one stderr line for an error-severity log record.
    pub fn scan_stderr(&self, line: &str) -> Option<StreamEvent> {
        let trimmed = line.trim();
        if is_error_line(trimmed) {
            Some(StreamEvent::error(trimmed))
        } else {
            None
        }
    }

    fn skip(&mut self, error: &str, raw: &str) {
        self.skipped_count += 1;
        let preview: String = raw.chars().take(200).collect();
        warn!(error = %error, raw_len = raw.len(), preview = %preview, "Failed to parse worker message");
    }
}

/// Whether a stderr line is an error-severity log record.
pub fn is_error_line(line: &str) -> bool {
    line.contains(ERROR_MARKER) && !line.contains(INFO_MARKER)
}

/// The one-shot runner prints a bare `{"status": ...}` object instead of a
/// typed message.
fn legacy_status_object(value: Value) -> ParsedLine {
    match value.get("status").and_then(Value::as_str) {
        Some("success") => ParsedLine::Event(StreamEvent::Result { payload: value }),
        Some("error") => {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("worker reported an error")
                .to_string();
            ParsedLine::Event(StreamEvent::error(message))
        }
        _ => {
            debug!("Ignoring worker JSON without a type discriminator");
            ParsedLine::Ignored
        }
    }
}
