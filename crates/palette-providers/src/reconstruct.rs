//! Delta reconstruction.
//!
//! Rebuilds assistant text and tool calls from the chunked chat-completion
//! stream. Frames are fed one at a time; each feed returns the observable
//! events it produced, in order. [`DeltaReconstructor::finish`] finalizes the
//! turn once the stream ends.
//!
//! Tool-call continuations are matched to their call purely by `index`
//! because providers may omit the id on continuation chunks.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProtocolError, ProviderFailure, classify_error_value};
use crate::sse::SseFrame;

const DONE_SENTINEL: &str = "[DONE]";

/// Observable event produced while a turn streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallStarted {
        call_id: String,
        name: String,
        index: usize,
    },
    ToolCallArgumentsDelta {
        call_id: String,
        text: String,
    },
}

/// Accumulator for one tool invocation while it streams in.
#[derive(Debug, Clone)]
pub struct ToolCallFragment {
    pub call_id: String,
    pub name: String,
    pub index: usize,
    arguments: String,
}

impl ToolCallFragment {
    fn new(call_id: String, name: String, index: usize) -> Self {
        Self {
            call_id,
            name,
            index,
            arguments: String::new(),
        }
    }

    fn append(&mut self, text: &str) {
        self.arguments.push_str(text);
    }

    pub fn raw_arguments(&self) -> &str {
        &self.arguments
    }
}

/// A tool call whose arguments have been fully accumulated and parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    pub index: usize,
    /// Exactly what the model streamed.
    pub raw_arguments: String,
    /// Always a JSON object; `{}` when the raw text was empty or malformed.
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Everything a finished turn produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructedTurn {
    pub text: String,
    /// Ordered by index.
    pub tool_calls: Vec<CompletedToolCall>,
    pub protocol_errors: Vec<ProtocolError>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

// --- Chat-completion chunk envelope ---

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Incremental state of one streaming turn.
#[derive(Debug, Default)]
pub struct DeltaReconstructor {
    text: String,
    fragments: BTreeMap<usize, ToolCallFragment>,
    raw: String,
    protocol_errors: Vec<ProtocolError>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    done: bool,
}

impl DeltaReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the end-of-stream sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume one frame and return the events it produced.
    pub fn feed(&mut self, frame: SseFrame) -> Vec<StreamEvent> {
        if self.done {
            debug!(?frame, "Frame after end-of-stream ignored");
            return Vec::new();
        }

        let data = match frame {
            SseFrame::Unrecognized(line) => {
                self.push_raw(&line);
                return Vec::new();
            }
            SseFrame::Data(data) => data,
        };

        if data.trim() == DONE_SENTINEL {
            self.done = true;
            return Vec::new();
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(%e, "Chunk outside the expected envelope");
                self.push_raw(&data);
                return Vec::new();
            }
        };

        if chunk.error.as_ref().is_some_and(|e| !e.is_null()) {
            self.push_raw(&data);
            return Vec::new();
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    self.text.push_str(&content);
                    events.push(StreamEvent::TextDelta(content));
                }
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                self.apply_tool_call_delta(delta, &mut events);
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }
        events
    }

    fn apply_tool_call_delta(&mut self, delta: ToolCallDelta, events: &mut Vec<StreamEvent>) {
        let function = delta.function.unwrap_or_default();
        let occupied = delta.index.and_then(|i| self.fragments.get(&i));

        let starts_new = match occupied {
            // Some providers repeat the id on every chunk; only a different id is a new call.
            Some(existing) => delta.id.as_ref().is_some_and(|id| *id != existing.call_id),
            None => delta.id.is_some() || function.name.is_some(),
        };

        let index = if starts_new {
            let index = self.start_call(delta.index, delta.id, function.name.clone());
            let fragment = &self.fragments[&index];
            events.push(StreamEvent::ToolCallStarted {
                call_id: fragment.call_id.clone(),
                name: fragment.name.clone(),
                index,
            });
            index
        } else {
            match delta.index.filter(|i| self.fragments.contains_key(i)) {
                Some(index) => index,
                None => {
                    let text = function.arguments.unwrap_or_default();
                    warn!(index = ?delta.index, "Tool call continuation without an open call");
                    self.protocol_errors.push(ProtocolError::OrphanContinuation {
                        index: delta.index,
                        text,
                    });
                    return;
                }
            }
        };

        let Some(fragment) = self.fragments.get_mut(&index) else {
            return;
        };
        if !starts_new && fragment.name.is_empty() {
            if let Some(name) = function.name {
                fragment.name = name;
            }
        }
        if let Some(args) = function.arguments {
            if !args.is_empty() {
                fragment.append(&args);
                events.push(StreamEvent::ToolCallArgumentsDelta {
                    call_id: fragment.call_id.clone(),
                    text: args,
                });
            }
        }
    }

    /// Open a fragment and return the index it was stored under.
    fn start_call(&mut self, index: Option<usize>, id: Option<String>, name: Option<String>) -> usize {
        let next_free = self.fragments.keys().next_back().map_or(0, |last| last + 1);

        let mut slot = index.unwrap_or(next_free);
        let call_id = match id {
            Some(id) if !id.is_empty() => id,
            _ => {
                self.protocol_errors
                    .push(ProtocolError::MissingCallId { index: slot });
                format!("call_{}", uuid::Uuid::new_v4().simple())
            }
        };

        if self.fragments.contains_key(&slot) {
            warn!(index = slot, call_id = %call_id, "Tool call start reused an occupied index");
            self.protocol_errors.push(ProtocolError::IndexReused {
                index: slot,
                call_id: call_id.clone(),
            });
            slot = next_free;
        }

        self.fragments.insert(
            slot,
            ToolCallFragment::new(call_id, name.unwrap_or_default(), slot),
        );
        slot
    }

    fn push_raw(&mut self, text: &str) {
        if !self.raw.is_empty() {
            self.raw.push('\n');
        }
        self.raw.push_str(text);
    }

    /// Finalize the turn.
    ///
    /// A raw buffer that decodes to a structured error fails the turn with the
    /// classified [`ProviderFailure`]; otherwise every fragment's arguments are
    /// parsed, with malformed JSON degrading to `{}`.
    pub fn finish(mut self) -> Result<ReconstructedTurn, ProviderFailure> {
        if !self.raw.is_empty() {
            if let Some(failure) = decode_error_payload(&self.raw) {
                return Err(failure);
            }
            warn!(raw = %self.raw, "Unrecognized provider stream payload");
            self.protocol_errors
                .push(ProtocolError::UnrecognizedPayload(std::mem::take(&mut self.raw)));
        }

        let mut tool_calls = Vec::with_capacity(self.fragments.len());
        for (index, fragment) in std::mem::take(&mut self.fragments) {
            let arguments = match parse_arguments(fragment.raw_arguments()) {
                Ok(value) => value,
                Err(reason) => {
                    warn!(call_id = %fragment.call_id, %reason, "Malformed tool call arguments");
                    self.protocol_errors.push(ProtocolError::MalformedArguments {
                        call_id: fragment.call_id.clone(),
                        reason,
                    });
                    Value::Object(Default::default())
                }
            };
            tool_calls.push(CompletedToolCall {
                id: fragment.call_id,
                name: fragment.name,
                index,
                raw_arguments: fragment.arguments,
                arguments,
            });
        }

        Ok(ReconstructedTurn {
            text: self.text,
            tool_calls,
            protocol_errors: self.protocol_errors,
            finish_reason: self.finish_reason,
            usage: self.usage,
        })
    }
}

fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

/// Look for a structured error in the raw buffer: the whole text first
/// (a pretty-printed body spans lines), then line by line.
fn decode_error_payload(raw: &str) -> Option<ProviderFailure> {
    let candidates = std::iter::once(raw.trim()).chain(raw.lines().map(str::trim));
    candidates
        .filter_map(|candidate| {
            let candidate = candidate.strip_prefix("data:").map_or(candidate, str::trim);
            serde_json::from_str::<Value>(candidate).ok()
        })
        .find_map(|value| classify_error_value(&value))
}
