//! Language-model provider abstraction.
//!
//! A provider opens a token stream and yields raw [`SseFrame`]s; the
//! [`DeltaReconstructor`] turns those frames into text and tool calls.
//! Keeping framing and reconstruction apart lets every OpenAI-compatible
//! endpoint (and the scripted test provider) share one reconstruction path.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use palette_core::types::Message;

pub mod error;
pub mod openai;
pub mod reconstruct;
pub mod registry;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod sse;

pub use error::{FailureClass, ProtocolError, ProviderFailure};
pub use reconstruct::{
    CompletedToolCall, DeltaReconstructor, ReconstructedTurn, StreamEvent, ToolCallFragment, Usage,
};
pub use registry::{ProviderRegistry, ResolvedModel};
pub use sse::SseFrame;

/// Credentials for authenticating with an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
    /// Local endpoints (Ollama) need no key.
    #[serde(rename = "none")]
    None,
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A request to the LLM.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
    pub system: Option<String>,
}

/// Raw frames of one streaming completion.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, ProviderFailure>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "openai", "ollama").
    fn id(&self) -> &str;

    /// Open a streaming chat completion.
    ///
    /// A non-success HTTP status is returned as a classified failure so the
    /// caller can decide whether to retry.
    async fn open_stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> Result<FrameStream, ProviderFailure>;
}
