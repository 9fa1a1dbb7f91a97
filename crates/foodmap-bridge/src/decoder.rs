//! Line-level decoding pipeline: result blocks first, then message parsing.

use foodmap_core::StreamEvent;

use crate::collector::{Collected, ResultBlockCollector};
use crate::parser::{MessageParser, ParsedLine};

/// An event decoded from worker output.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub event: StreamEvent,
    /// Whether this event ends the session.
    pub terminal: bool,
}

impl Decoded {
    /// A non-terminal event.
    pub fn progress(event: StreamEvent) -> Self {
        Self {
            event,
            terminal: false,
        }
    }

    /// A terminal event.
    pub fn terminal(event: StreamEvent) -> Self {
        Self {
            event,
            terminal: true,
        }
    }
}

/// Decodes framed stdout lines into events.
///
/// Lines inside a result block never reach the parser. A `result` or `error`
/// message printed by the worker is terminal; a result block that fails to
/// parse is reported as a non-terminal `Error`.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    collector: ResultBlockCollector,
    parser: MessageParser,
}

impl OutputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one complete stdout line.
    pub fn decode_line(&mut self, line: String) -> Option<Decoded> {
        match self.collector.feed(line) {
            Collected::Line(line) => match self.parser.parse_stdout(&line) {
                ParsedLine::Event(event) => {
                    let terminal = event.is_outcome();
                    Some(Decoded { event, terminal })
                }
                ParsedLine::Diagnostic | ParsedLine::Ignored => None,
            },
            Collected::Consumed => None,
            Collected::Event(event) => {
                let terminal = matches!(event, StreamEvent::Result { .. });
                Some(Decoded { event, terminal })
            }
        }
    }

    /// End of stdout.
    pub fn finish(&mut self) -> Option<Decoded> {
        self.collector.finish().map(Decoded::progress)
    }

    /// Scan one stderr line; error-severity lines become non-terminal errors.
    pub fn scan_stderr(&self, line: &str) -> Option<StreamEvent> {
        self.parser.scan_stderr(line)
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }
}
