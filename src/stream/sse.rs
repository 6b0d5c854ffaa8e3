//! Line-oriented SSE decoding for vendor streams, plus frame encoding.
//!
//! Vendors stream one JSON payload per `data:` line. Lines are split on
//! `\n` at the byte level, so a multi-byte character split across network
//! chunks is reassembled before it is validated as UTF-8.
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use smallvec::SmallVec;

use crate::error::GatewayError;

/// Data payload that ends a stream without error.
pub const DONE_SENTINEL: &str = "[DONE]";
const DATA_PREFIX: &str = "data:";

/// One meaningful line of an SSE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Trimmed payload of a `data:` line.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

struct PendingLines {
    lines: SmallVec<[SseLine; 8]>,
    head: usize,
}

impl PendingLines {
    #[inline]
    fn new() -> Self {
        Self {
            lines: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseLine> {
        if self.head >= self.lines.len() {
            return None;
        }
        let line = std::mem::replace(&mut self.lines[self.head], SseLine::Done);
        self.head += 1;
        if self.head == self.lines.len() {
            self.lines.clear();
            self.head = 0;
        }
        Some(line)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseLine>) {
        if parsed.is_empty() {
            return;
        }
        self.lines.extend(parsed.drain(..));
    }
}

/// Incremental SSE line decoder.
///
/// Feed it raw body chunks split at arbitrary byte boundaries; it yields the
/// `data:` payloads of every complete line. Blank lines and lines with any
/// other field name (`event:`, `id:`, comments) are skipped.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    read_offset: usize,
    bytes_seen: u64,
}

impl SseLineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total body bytes fed so far.
    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Feed one body chunk, appending decoded lines to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StreamError`] for a line that is not UTF-8.
    /// Lines completed before the bad one are still appended.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<SseLine>) -> Result<(), GatewayError> {
        self.bytes_seen += chunk.len() as u64;
        let scan_start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut processed_up_to = self.read_offset;
        let mut result = Ok(());
        for rel_pos in memchr_iter(b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            result = decode_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
            if result.is_err() {
                break;
            }
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024)
        {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
        result
    }

    /// Flush a trailing line that had no terminating newline.
    ///
    /// # Errors
    ///
    /// Same as [`SseLineDecoder::feed`].
    pub fn finish(&mut self, out: &mut Vec<SseLine>) -> Result<(), GatewayError> {
        let result = if self.read_offset < self.buffer.len() {
            decode_line(&self.buffer[self.read_offset..], out)
        } else {
            Ok(())
        };
        self.buffer.clear();
        self.read_offset = 0;
        result
    }
}

fn decode_line(raw: &[u8], out: &mut Vec<SseLine>) -> Result<(), GatewayError> {
    let line = std::str::from_utf8(raw).map_err(|err| {
        GatewayError::stream(format!("stream line is not valid UTF-8: {err}")).with_payload(raw)
    })?;
    let line = line.trim();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(());
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(());
    }
    if payload == DONE_SENTINEL {
        out.push(SseLine::Done);
    } else {
        out.push(SseLine::Data(payload.to_owned()));
    }
    Ok(())
}

struct LineStreamState<S> {
    body: Pin<Box<S>>,
    decoder: SseLineDecoder,
    parsed: Vec<SseLine>,
    pending: PendingLines,
    deferred_error: Option<GatewayError>,
    finished: bool,
}

/// Split a response body into SSE lines using [`SseLineDecoder`].
///
/// Yields an error (and then ends) when the body fails to read, when a line
/// is not UTF-8, or when the body ends without a single byte.
pub fn sse_line_stream<S, E>(body: S) -> impl Stream<Item = Result<SseLine, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = LineStreamState {
        body: Box::pin(body),
        decoder: SseLineDecoder::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingLines::new(),
        deferred_error: None,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(line), state));
            }
            if let Some(err) = state.deferred_error.take() {
                state.finished = true;
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match state.body.as_mut().next().await {
                Some(Ok(bytes)) => {
                    let fed = state.decoder.feed(&bytes, &mut state.parsed);
                    state.pending.extend_from_vec(&mut state.parsed);
                    if let Err(err) = fed {
                        state.deferred_error = Some(err);
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    let err = GatewayError::stream(format!("failed to read stream body: {err}"));
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    if state.decoder.bytes_seen() == 0 {
                        return Some((Err(GatewayError::stream("empty stream body")), state));
                    }
                    let flushed = state.decoder.finish(&mut state.parsed);
                    state.pending.extend_from_vec(&mut state.parsed);
                    if let Err(err) = flushed {
                        state.deferred_error = Some(err);
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append a `data:` frame to `out`.
pub fn push_data_frame(out: &mut String, payload: &str) {
    out.reserve(payload.len() + 8);
    out.push_str("data: ");
    out.push_str(payload);
    out.push_str("\n\n");
}

/// A single `data:` frame.
#[must_use]
pub fn data_frame(payload: &str) -> String {
    let mut out = String::new();
    push_data_frame(&mut out, payload);
    out
}
