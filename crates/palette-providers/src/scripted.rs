//! Scripted provider: replays canned SSE bodies.
//!
//! Each `open_stream` call consumes the next [`ScriptedResponse`]. Bodies go
//! through the same SSE framer as a live provider, so the chunk boundaries
//! in a script are the chunk boundaries the reconstructor sees.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use crate::sse::{SseFrame, parse_sse_stream};
use crate::{CompletionRequest, Credentials, FrameStream, LlmProvider, ProviderFailure};

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Raw body chunks, delivered one by one.
    Body(Vec<String>),
    /// Fail to open the stream.
    Fail(ProviderFailure),
    /// A stream that never produces anything.
    Hang,
}

pub struct ScriptedProvider {
    id: String,
    script: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            id: "scripted".into(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open_stream(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> Result<FrameStream, ProviderFailure> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(ScriptedResponse::Body(chunks)) => {
                let bytes = chunks
                    .into_iter()
                    .map(|c| Ok::<_, std::io::Error>(Bytes::from(c)));
                Ok(Box::pin(parse_sse_stream(futures::stream::iter(bytes))))
            }
            Some(ScriptedResponse::Fail(failure)) => Err(failure),
            Some(ScriptedResponse::Hang) => Ok(Box::pin(futures::stream::pending::<
                Result<SseFrame, ProviderFailure>,
            >())),
            None => Err(ProviderFailure::provider("Scripted provider has no more responses")),
        }
    }
}

fn sse(value: serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

/// A text-only turn, one SSE event per part.
pub fn text_turn(parts: &[&str]) -> ScriptedResponse {
    let mut chunks: Vec<String> = parts
        .iter()
        .map(|p| sse(json!({"choices": [{"index": 0, "delta": {"content": p}}]})))
        .collect();
    chunks.push(sse(
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
    ));
    chunks.push("data: [DONE]\n\n".into());
    ScriptedResponse::Body(chunks)
}

/// A turn with tool calls. Each call is `(id, name, argument fragments)`;
/// all starts are sent first, then the fragments of each call in order.
pub fn tool_calls_turn(calls: &[(&str, &str, &[&str])]) -> ScriptedResponse {
    let mut chunks = Vec::new();
    for (index, (id, name, _)) in calls.iter().enumerate() {
        chunks.push(sse(json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": index, "id": id, "type": "function", "function": {"name": name, "arguments": ""}}
        ]}}]})));
    }
    for (index, (_, _, fragments)) in calls.iter().enumerate() {
        for fragment in fragments.iter() {
            chunks.push(sse(json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": index, "function": {"arguments": fragment}}
            ]}}]})));
        }
    }
    chunks.push(sse(
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
    ));
    chunks.push("data: [DONE]\n\n".into());
    ScriptedResponse::Body(chunks)
}

/// A single tool call whose arguments arrive in `fragments`.
pub fn tool_call_turn(id: &str, name: &str, fragments: &[&str]) -> ScriptedResponse {
    tool_calls_turn(&[(id, name, fragments)])
}
