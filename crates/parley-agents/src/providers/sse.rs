//! Server-sent event decoding shared by the provider adapters.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;

use super::{ProviderError, TextStream};

/// One decoded event: the optional `event:` name and the joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder. Bytes may be pushed in arbitrary chunks; events
/// are produced once their terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete event, if one is buffered.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        while let Some((pos, len)) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..len);
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                return Some(event);
            }
        }
        None
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&block))
    }
}

fn find_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// What an adapter makes of one decoded event.
pub(crate) enum Frame {
    Text(String),
    Skip,
    Done,
    Error(ProviderError),
}

struct State<S, F> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    extract: F,
    eof: bool,
    done: bool,
}

/// Turn an SSE byte stream into raw text deltas using `extract` to interpret
/// each event. The stream ends on `Frame::Done`, on end of input, or after
/// yielding the first error.
pub(crate) fn text_stream<S, E, F>(body: S, extract: F) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
    F: FnMut(&SseEvent) -> Frame + Send + 'static,
{
    let state = State {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        extract,
        eof: false,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            let event = match st.decoder.next_event() {
                Some(event) => Some(event),
                None if st.eof => {
                    st.done = true;
                    st.decoder.finish()
                }
                None => None,
            };

            if let Some(event) = event {
                match (st.extract)(&event) {
                    Frame::Text(text) if !text.is_empty() => return Some((Ok(text), st)),
                    Frame::Text(_) | Frame::Skip => continue,
                    Frame::Done => return None,
                    Frame::Error(err) => {
                        st.done = true;
                        return Some((Err(err), st));
                    }
                }
            }

            if st.done {
                return None;
            }

            match st.body.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    let err = ProviderError::UpstreamUnknown(format!("stream interrupted: {e}"));
                    return Some((Err(err), st));
                }
                None => st.eof = true,
            }
        }
    }))
}
