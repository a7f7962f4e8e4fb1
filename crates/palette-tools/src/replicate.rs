//! Replicate predictions adapter.
//!
//! A prediction is created once and then polled by id until it settles.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::generation::{
    GeneratedArtifact, GenerationError, GenerationRequest, MediaKind, http_client, provider_error,
};
use crate::polling::{JobApi, JobStatus};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
/// Per request; a prediction itself is bounded by the poll budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ReplicateJobs {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl ReplicateJobs {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            client: http_client(REQUEST_TIMEOUT),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            default_model: default_model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Endpoint and body for creating a prediction. `owner/name:version`
    /// pins a version; `owner/name` runs the model's latest.
    fn create_request(&self, request: &GenerationRequest) -> (String, serde_json::Value) {
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let mut input = serde_json::Map::new();
        input.insert("prompt".into(), json!(request.prompt));
        input.insert("width".into(), json!(request.width));
        input.insert("height".into(), json!(request.height));
        for (k, v) in &request.params {
            input.insert(k.clone(), v.clone());
        }

        match model.split_once(':') {
            Some((_, version)) => (
                format!("{}/v1/predictions", self.base_url),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/v1/models/{model}/predictions", self.base_url),
                json!({ "input": input }),
            ),
        }
    }
}

/// Interpret a prediction object.
pub fn parse_prediction(
    body: &serde_json::Value,
    request: &GenerationRequest,
) -> Result<JobStatus, GenerationError> {
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| GenerationError::InvalidResponse("prediction has no status".into()))?;

    match status {
        "starting" | "processing" => Ok(JobStatus::Pending),
        "succeeded" => {
            let output = body.get("output").unwrap_or(&serde_json::Value::Null);
            let url = output
                .as_str()
                .or_else(|| output.as_array().and_then(|a| a.first()).and_then(|v| v.as_str()))
                .ok_or_else(|| {
                    GenerationError::InvalidResponse("succeeded prediction has no output".into())
                })?;
            Ok(JobStatus::Succeeded(GeneratedArtifact {
                mime_type: mime_for(url, request.kind).into(),
                width: request.width,
                height: request.height,
                url: url.to_string(),
            }))
        }
        "failed" | "canceled" => {
            let reason = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or(status)
                .to_string();
            Ok(JobStatus::Failed(reason))
        }
        other => Err(GenerationError::InvalidResponse(format!(
            "unknown prediction status '{other}'"
        ))),
    }
}

fn mime_for(url: &str, kind: MediaKind) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => match kind {
            MediaKind::Image => "image/png",
            MediaKind::Video => "video/mp4",
        },
    }
}

#[async_trait]
impl JobApi for ReplicateJobs {
    fn id(&self) -> &str {
        "replicate"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let (url, body) = self.create_request(request);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::transport)?;

        if !response.status().is_success() {
            return Err(provider_error(self.id(), response).await);
        }

        let body: serde_json::Value = response.json().await.map_err(GenerationError::transport)?;
        body.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| GenerationError::InvalidResponse("prediction has no id".into()))
    }

    async fn poll(
        &self,
        job_id: &str,
        request: &GenerationRequest,
    ) -> Result<JobStatus, GenerationError> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{job_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(GenerationError::transport)?;

        if !response.status().is_success() {
            return Err(provider_error(self.id(), response).await);
        }

        let body: serde_json::Value = response.json().await.map_err(GenerationError::transport)?;
        debug!(job_id, status = ?body.get("status"), "Prediction polled");
        parse_prediction(&body, request)
    }
}
