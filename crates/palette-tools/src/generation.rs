//! Generation-provider collaborator interface.
//!
//! Adapters for third-party image/video APIs implement [`GenerationProvider`].
//! Every request carries the tool call id as its correlation id, so a result
//! is always tied to the request that produced it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for generation backends; `timeout` bounds a whole request.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(%e, "HTTP client setup failed, using defaults");
            reqwest::Client::new()
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Canvas element type for this kind.
    pub fn element_kind(self) -> &'static str {
        match self {
            MediaKind::Image => palette_core::canvas::KIND_IMAGE,
            MediaKind::Video => palette_core::canvas::KIND_VIDEO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Request-scoped id (the tool call id).
    pub correlation_id: String,
    pub kind: MediaKind,
    pub prompt: String,
    pub model: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Provider-specific extras passed through untouched.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Where clients fetch the artifact (a `/files/...` path or a remote URL).
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("{provider} request failed{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("generation job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("generation job {job_id} did not finish after {polls} polls")]
    PollingExhausted { job_id: String, polls: u32 },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to store artifact: {0}")]
    Storage(String),
}

impl GenerationError {
    pub fn transport(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }

    /// Transient failures are worth another poll.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Transport(_) => true,
            GenerationError::Provider { status, .. } => {
                matches!(status, Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider identifier (e.g. "openai", "replicate").
    fn id(&self) -> &str;

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifact, GenerationError>;
}

/// Read an error response body into a [`GenerationError::Provider`].
pub(crate) async fn provider_error(provider: &str, response: reqwest::Response) -> GenerationError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("detail"))
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or(body);
    GenerationError::Provider {
        provider: provider.to_string(),
        status: Some(status),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GenerationError::Provider {
            provider: "openai".into(),
            status: Some(400),
            message: "prompt rejected".into(),
        };
        assert_eq!(err.to_string(), "openai request failed (HTTP 400): prompt rejected");

        let err = GenerationError::PollingExhausted {
            job_id: "p1".into(),
            polls: 3,
        };
        assert_eq!(err.to_string(), "generation job p1 did not finish after 3 polls");
    }

    #[test]
    fn test_transient_classification() {
        assert!(GenerationError::Transport("reset".into()).is_transient());
        let server = GenerationError::Provider {
            provider: "replicate".into(),
            status: Some(503),
            message: String::new(),
        };
        assert!(server.is_transient());
        let client = GenerationError::Provider {
            provider: "replicate".into(),
            status: Some(422),
            message: String::new(),
        };
        assert!(!client.is_transient());
        assert!(!GenerationError::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn test_media_kind_element_kind() {
        assert_eq!(MediaKind::Image.element_kind(), "image");
        assert_eq!(MediaKind::Video.element_kind(), "video");
    }
}
