//! Generic SSE (Server-Sent Events) line parser.
//!
//! Converts a byte stream into a stream of [`SseFrame`]s. Lines that are not
//! SSE fields (a bare JSON error body, for instance) are passed through as
//! [`SseFrame::Unrecognized`] so the caller can inspect them.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::ProviderFailure;

/// One unit of a provider's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A complete `data:` payload (multi-line data joined with `\n`).
    Data(String),
    /// A non-empty line that is not an SSE field.
    Unrecognized(String),
}

/// Parse a byte stream (e.g. `reqwest::Response::bytes_stream()`) as SSE.
pub fn parse_sse_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<SseFrame, ProviderFailure>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: Vec::new(),
            current_data: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.ready.pop_front() {
                    return Some((Ok(frame), state));
                }
                if state.finished {
                    return None;
                }

                // Buffer raw bytes so a multi-byte character split across
                // chunks is decoded whole.
                if let Some(newline_pos) = state.buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = state.buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&line[..newline_pos]);
                    state.handle_line(line.trim_end_matches('\r'));
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((
                            Err(ProviderFailure::provider(format!("SSE stream error: {e}"))),
                            state,
                        ));
                    }
                    None => {
                        // Stream ended. A trailing line without newline still counts.
                        if !state.buffer.is_empty() {
                            let rest = std::mem::take(&mut state.buffer);
                            let line = String::from_utf8_lossy(&rest);
                            state.handle_line(line.trim_end_matches('\r'));
                        }
                        state.dispatch();
                        state.finished = true;
                    }
                }
            }
        },
    )
}

struct SseState<S> {
    byte_stream: Pin<Box<S>>,
    buffer: Vec<u8>,
    current_data: Vec<String>,
    ready: VecDeque<SseFrame>,
    finished: bool,
}

impl<S> SseState<S> {
    fn handle_line(&mut self, line: &str) {
        if line.is_empty() {
            // Empty line = dispatch event
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            // Comment, skip
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.current_data.push(strip_space(value).to_string());
        } else if line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:")
        {
            // Fields the chat dialect does not use.
        } else {
            self.dispatch();
            self.ready.push_back(SseFrame::Unrecognized(line.to_string()));
        }
    }

    fn dispatch(&mut self) {
        if !self.current_data.is_empty() {
            let data = self.current_data.join("\n");
            self.current_data.clear();
            self.ready.push_back(SseFrame::Data(data));
        }
    }
}

fn strip_space(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}
