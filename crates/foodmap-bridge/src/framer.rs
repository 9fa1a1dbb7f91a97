//! Line framing over arbitrarily chunked byte streams.
//!
//! Worker stdout and upstream HTTP bodies both arrive in chunks whose
//! boundaries have nothing to do with lines. [`LineFramer`] turns those chunks
//! back into complete lines; [`LineReader`] drives it from an `AsyncRead`.

use std::collections::VecDeque;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reassembles newline-terminated lines from byte chunks.
///
/// Holds at most one partial line between calls. Bytes are decoded as UTF-8
/// only once a line is complete, so a multi-byte character split across two
/// chunks is preserved.
#[derive(Debug, Default)]
pub struct LineFramer {
    partial: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completed (newline stripped).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            lines.push(decode_line(std::mem::take(&mut self.partial)));
            rest = &rest[pos + 1..];
        }

        self.partial.extend_from_slice(rest);
        lines
    }

    /// Flush the trailing line at end of stream, if it lacked a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(decode_line(std::mem::take(&mut self.partial)))
        }
    }

    /// Number of buffered bytes belonging to the current partial line.
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}

fn decode_line(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Lazily yields complete lines from an async byte source.
pub struct LineReader<R> {
    reader: R,
    framer: LineFramer,
    ready: VecDeque<String>,
    buf: Box<[u8]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            framer: LineFramer::new(),
            ready: VecDeque::new(),
            buf: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
            eof: false,
        }
    }

    /// Next complete line, or `None` once the source is exhausted.
    ///
    /// Cancel safe: if the returned future is dropped before completion no
    /// bytes are lost, so it can be used as a `tokio::select!` branch.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
                if let Some(last) = self.framer.finish() {
                    self.ready.push_back(last);
                }
                continue;
            }
            self.ready.extend(self.framer.push(&self.buf[..n]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "{\"type\":\"phase\",\"phase\":\"starting\"}\n\
        INFO loading cells\r\n\
        \n\
        FINAL_RESULT_START\n\
        {\"name\":\"Café Nº5\",\"people\":4200}\n\
        FINAL_RESULT_END\n\
        trailing without newline";

    fn frame_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(framer.push(chunk));
        }
        lines.extend(framer.finish());
        lines
    }

    #[test]
    fn test_single_chunk() {
        let lines = frame_all(&[SAMPLE.as_bytes()]);
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[1], "INFO loading cells");
        assert_eq!(lines[2], "");
        assert_eq!(lines[6], "trailing without newline");
    }

    #[test]
    fn test_every_two_way_split_is_equivalent() {
        let bytes = SAMPLE.as_bytes();
        let expected = frame_all(&[bytes]);
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(frame_all(&[a, b]), expected, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time_is_equivalent() {
        let bytes = SAMPLE.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(frame_all(&chunks), frame_all(&[bytes]));
    }

    #[test]
    fn test_irregular_chunk_sizes_are_equivalent() {
        let bytes = SAMPLE.as_bytes();
        let expected = frame_all(&[bytes]);

        // Deterministic pseudo-random chunk sizes between 1 and 17 bytes.
        for seed in 1u32..50 {
            let mut state = seed;
            let mut chunks = Vec::new();
            let mut rest = bytes;
            while !rest.is_empty() {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let size = ((state >> 16) as usize % 17 + 1).min(rest.len());
                let (chunk, tail) = rest.split_at(size);
                chunks.push(chunk);
                rest = tail;
            }
            assert_eq!(frame_all(&chunks), expected, "seed {}", seed);
        }
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "é\n".as_bytes();
        let lines = frame_all(&[&bytes[..1], &bytes[1..]]);
        assert_eq!(lines, vec!["é".to_string()]);
    }

    #[test]
    fn test_finish_without_partial() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"a\n"), vec!["a".to_string()]);
        assert_eq!(framer.pending_len(), 0);
        assert!(framer.finish().is_none());
    }

    #[tokio::test]
    async fn test_line_reader_flushes_trailing_line() {
        let data: &[u8] = b"one\ntwo\nthree";
        let mut reader = LineReader::new(data);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(reader.next_line().await.unwrap().is_none());
    }
}
