//! Guest stdout demultiplexer.
//!
//! A guest answers a request by writing to stdout:
//!
//! ```text
//! Content-Type: text/plain\n
//! X-Custom: value\n
//! \n
//! \n
//! <body bytes...>
//! ```
//!
//! [`Demultiplexer`] consumes those writes as they happen and routes every
//! byte to a [`ResponseSink`], either as a header or as body. It moves from
//! [`Phase::Header`] to [`Phase::Body`] exactly once, the first time two
//! consecutive blank lines are seen, and never moves back.
//!
//! How line boundaries are found during the header phase is governed by
//! [`LineFraming`]:
//!
//! - [`LineFraming::Reassemble`] buffers a partial line until its newline
//!   arrives, so output is parsed the same way however the guest chunks it.
//! - [`LineFraming::PerChunk`] scans each write call on its own. A line split
//!   across two writes is seen as two lines.
//!
//! The stdout stream cannot always hand over a guest write in one call: the
//! WASI layer slices large writes into pieces. A piece that is known to be
//! followed by more of the same write goes through
//! [`Demultiplexer::feed_continued`], which holds back a trailing partial
//! header line in per-chunk mode instead of parsing it as a line of its own.

use tracing::{debug, trace};

use wago_common::{GatewayConfig, LineFraming, ProtocolError};

use crate::budget::BodyBudget;

/// Blank lines that end the header block.
const HEADER_TERMINATOR_BLANKS: u32 = 2;

/// Which part of the response the guest is currently writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Lines are parsed as `name: value` headers.
    Header,
    /// Bytes are forwarded to the body untouched.
    Body,
}

/// Destination for a decoded response.
///
/// The demultiplexer guarantees that every `set_header` happens before
/// `end_headers`, which is called exactly once and before the first
/// `write_body`.
pub trait ResponseSink {
    /// Set a header, replacing any earlier value with the same name.
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), ProtocolError>;

    /// The header block is complete.
    fn end_headers(&mut self) -> Result<(), ProtocolError>;

    /// Append bytes to the response body.
    fn write_body(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Budget limiting how much body may be queued ahead of the consumer.
    ///
    /// `None` means the sink accepts body bytes without limit.
    fn body_budget(&self) -> Option<BodyBudget> {
        None
    }
}

/// A [`ResponseSink`] that keeps the whole response in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedResponse {
    headers: Vec<(String, String)>,
    headers_complete: bool,
    body: Vec<u8>,
}

impl BufferedResponse {
    /// Create an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers in the order they were first set.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Whether the header block has been terminated.
    pub fn headers_complete(&self) -> bool {
        self.headers_complete
    }

    /// Body bytes received so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl ResponseSink for BufferedResponse {
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn end_headers(&mut self) -> Result<(), ProtocolError> {
        self.headers_complete = true;
        Ok(())
    }

    fn write_body(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.body.extend_from_slice(bytes);
        Ok(())
    }
}

/// Streaming header/body decoder over guest stdout writes.
///
/// Errors are sticky: after the first [`ProtocolError`] every call returns
/// that same error and nothing more reaches the sink.
pub struct Demultiplexer<S> {
    sink: S,
    framing: LineFraming,
    max_header_bytes: usize,
    phase: Phase,
    /// Consecutive blank lines seen. In per-chunk mode this keeps counting
    /// blank lines after the transition.
    blank_lines: u32,
    header_bytes: usize,
    /// Partial header line carried between writes. In per-chunk mode only
    /// the tail of a continued piece is carried.
    pending: Vec<u8>,
    failure: Option<ProtocolError>,
}

impl<S: ResponseSink> Demultiplexer<S> {
    /// Create a demultiplexer in the header phase.
    pub fn new(sink: S, config: &GatewayConfig) -> Self {
        Self {
            sink,
            framing: config.line_framing,
            max_header_bytes: config.max_header_bytes,
            phase: Phase::Header,
            blank_lines: 0,
            header_bytes: 0,
            pending: Vec::new(),
            failure: None,
        }
    }

    /// Feed one guest write.
    ///
    /// Returns the number of bytes consumed. In reassemble mode this is
    /// always the chunk length. In per-chunk mode a blank header-phase line
    /// counts as one byte, a header line as its length without the line
    /// terminator, and body bytes as forwarded.
    ///
    /// WASI preview1 has no way to report a short write to the guest, so the
    /// stdout stream only logs this count.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the guest output is malformed, the
    /// header block is too large, or the sink refuses the data.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize, ProtocolError> {
        self.feed_piece(chunk, false)
    }

    /// Feed one piece of a guest write that may continue in the next call.
    ///
    /// In per-chunk mode a trailing header-phase fragment without `\n` is
    /// held back and joined with the start of the next call. A fragment
    /// held back this way counts as consumed in the call that holds it.
    /// In reassemble mode this is the same as [`feed`](Self::feed).
    ///
    /// # Errors
    ///
    /// Same as [`feed`](Self::feed).
    pub fn feed_continued(&mut self, chunk: &[u8]) -> Result<usize, ProtocolError> {
        self.feed_piece(chunk, true)
    }

    fn feed_piece(&mut self, chunk: &[u8], continued: bool) -> Result<usize, ProtocolError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let result = match self.framing {
            LineFraming::Reassemble => self.feed_reassembled(chunk),
            LineFraming::PerChunk => self.feed_per_chunk(chunk, continued),
        };

        if let Err(err) = &result {
            debug!(error = %err, phase = ?self.phase, "Guest output rejected");
            self.failure = Some(err.clone());
        }
        result
    }

    /// Signal that the guest will write no more output.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure if there was one, or
    /// [`ProtocolError::HeadersNotTerminated`] if the header block never ended.
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        if self.phase == Phase::Header {
            let err = ProtocolError::HeadersNotTerminated;
            self.failure = Some(err.clone());
            return Err(err);
        }

        Ok(())
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The first error this demultiplexer produced, if any.
    pub fn failure(&self) -> Option<&ProtocolError> {
        self.failure.as_ref()
    }

    /// Get a reference to the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the demultiplexer and return its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn feed_reassembled(&mut self, chunk: &[u8]) -> Result<usize, ProtocolError> {
        let mut rest = chunk;

        while self.phase == Phase::Header {
            let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
                self.account_header_bytes(rest.len())?;
                self.pending.extend_from_slice(rest);
                return Ok(chunk.len());
            };

            self.account_header_bytes(newline + 1)?;
            if self.pending.is_empty() {
                self.header_line(&rest[..newline])?;
            } else {
                let mut line = std::mem::take(&mut self.pending);
                line.extend_from_slice(&rest[..newline]);
                self.header_line(&line)?;
            }
            rest = &rest[newline + 1..];
        }

        if !rest.is_empty() {
            self.sink.write_body(rest)?;
        }
        Ok(chunk.len())
    }

    fn feed_per_chunk(&mut self, chunk: &[u8], continued: bool) -> Result<usize, ProtocolError> {
        // One blank line past the terminator: stop scanning altogether
        if self.blank_lines > HEADER_TERMINATOR_BLANKS {
            self.sink.write_body(chunk)?;
            return Ok(chunk.len());
        }

        // A fragment held back from the previous piece starts the first line
        let carried = std::mem::take(&mut self.pending);
        let joined;
        let input = if carried.is_empty() {
            chunk
        } else {
            joined = [carried.as_slice(), chunk].concat();
            joined.as_slice()
        };

        let mut counted = carried.len();
        let mut consumed = 0;
        let mut lines = scan_lines(input).peekable();
        while let Some(raw) = lines.next() {
            let line = raw.strip_suffix(b"\n").unwrap_or(raw);
            let fresh = raw.len() - counted;
            let unfinished = continued && line.len() == raw.len() && lines.peek().is_none();

            match self.phase {
                Phase::Body => {
                    if strip_cr(line).is_empty() {
                        self.blank_lines += 1;
                    }
                    self.sink.write_body(raw)?;
                    consumed += fresh;
                }
                Phase::Header if unfinished => {
                    self.account_header_bytes(fresh)?;
                    trace!(len = raw.len(), "Holding back partial header line");
                    self.pending.extend_from_slice(raw);
                    consumed += fresh;
                }
                Phase::Header => {
                    self.account_header_bytes(fresh)?;
                    let text_len = strip_cr(line).len();
                    self.header_line(line)?;
                    consumed += if text_len == 0 {
                        1
                    } else {
                        text_len.saturating_sub(counted)
                    };
                }
            }
            counted = 0;
        }
        Ok(consumed)
    }

    /// Apply one complete header-phase line, without its `\n`.
    ///
    /// Callers pass the line with its `\r`; one trailing `\r` is dropped here.
    fn header_line(&mut self, line: &[u8]) -> Result<(), ProtocolError> {
        let line = strip_cr(line);

        if line.is_empty() {
            self.blank_lines += 1;
            if self.blank_lines == HEADER_TERMINATOR_BLANKS {
                self.phase = Phase::Body;
                debug!(header_bytes = self.header_bytes, "Header block complete");
                self.sink.end_headers()?;
            }
            return Ok(());
        }

        self.blank_lines = 0;
        let (name, value) = parse_header(line)?;
        trace!(name = %name, "Guest set header");
        self.sink.set_header(&name, &value)
    }

    fn account_header_bytes(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.header_bytes += len;
        if self.header_bytes > self.max_header_bytes {
            return Err(ProtocolError::HeadersTooLarge {
                limit: self.max_header_bytes,
            });
        }
        Ok(())
    }
}

impl<S> std::fmt::Debug for Demultiplexer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("framing", &self.framing)
            .field("phase", &self.phase)
            .field("blank_lines", &self.blank_lines)
            .field("header_bytes", &self.header_bytes)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Split a header line at its first `:` and trim both halves.
fn parse_header(line: &[u8]) -> Result<(String, String), ProtocolError> {
    let text = String::from_utf8_lossy(line);

    let (name, value) = text
        .split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| ProtocolError::MalformedHeader {
            line: text.to_string(),
        })?;

    Ok((name.to_string(), value.to_string()))
}

/// Lines of `chunk`, each including its `\n` when it has one.
///
/// A trailing fragment without `\n` is yielded as a line; an empty
/// chunk yields nothing.
fn scan_lines(chunk: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = chunk;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .map_or(rest.len(), |i| i + 1);
        let (line, tail) = rest.split_at(end);
        rest = tail;
        Some(line)
    })
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
