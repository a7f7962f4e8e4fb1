//! OpenAI Chat Completions API provider.
//!
//! Streams from `/v1/chat/completions`. Also serves OpenRouter, Ollama and any
//! other OpenAI-compatible endpoint configured with a `base_url`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use palette_core::types::Message;

use crate::sse::parse_sse_stream;
use crate::{CompletionRequest, Credentials, FrameStream, LlmProvider, ProviderFailure, ToolDefinition};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest silence tolerated between two reads of a response. Streams have
/// no overall deadline; a long answer keeps producing chunks.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client(read_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(%e, "HTTP client setup failed, using defaults");
            reqwest::Client::new()
        })
}

/// API style; decides the minor behavior differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    OpenRouter,
    Ollama,
}

pub struct OpenAiProvider {
    pub base_url: String,
    pub api_style: ApiStyle,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    fn with_style(id: &str, base_url: &str, api_style: ApiStyle) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_style,
            provider_id: id.into(),
            client: http_client(READ_TIMEOUT),
        }
    }

    pub fn openai(base_url: Option<&str>) -> Self {
        Self::with_style("openai", base_url.unwrap_or(OPENAI_BASE_URL), ApiStyle::OpenAi)
    }

    pub fn openrouter(base_url: Option<&str>) -> Self {
        Self::with_style(
            "openrouter",
            base_url.unwrap_or(OPENROUTER_BASE_URL),
            ApiStyle::OpenRouter,
        )
    }

    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::with_style("ollama", base_url.unwrap_or(OLLAMA_BASE_URL), ApiStyle::Ollama)
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    /// Any other OpenAI-compatible endpoint.
    pub fn compatible(id: &str, base_url: &str) -> Self {
        Self::with_style(id, base_url, ApiStyle::OpenAi)
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn build_body(&self, request: &CompletionRequest) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system {
            messages.push(Message::system(system.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(Self::format_tools(&request.tools))
        };

        OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            stream: true,
            temperature: request.temperature,
            tools,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

// --- OpenAI request types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn open_stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> Result<FrameStream, ProviderFailure> {
        let body = self.build_body(request);

        debug!(provider = %self.provider_id, model = %body.model, base_url = %self.base_url, "Opening completion stream");

        let mut req_builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        // Auth differs by style
        match credentials {
            Credentials::ApiKey { api_key } if self.api_style != ApiStyle::Ollama => {
                req_builder = req_builder.header("authorization", format!("Bearer {api_key}"));
            }
            Credentials::None if self.api_style != ApiStyle::Ollama => {
                return Err(ProviderFailure::provider(format!(
                    "Provider '{}' requires an API key",
                    self.provider_id
                )));
            }
            _ => {}
        }
        if self.api_style == ApiStyle::OpenRouter {
            req_builder = req_builder.header("HTTP-Referer", "https://palette.local");
        }

        let response = req_builder
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderFailure::transport(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let failure = ProviderFailure::from_status(status, &body);
            warn!(provider = %self.provider_id, status, class = ?failure.class, "Provider rejected stream");
            return Err(failure);
        }

        Ok(Box::pin(parse_sse_stream(response.bytes_stream())))
    }
}
