//! OpenAI Images API adapter.
//!
//! Images come back base64-encoded and are written to the files directory the
//! gateway serves under `/files`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use tracing::info;

use palette_core::session::sanitize_id;

use crate::generation::{
    GeneratedArtifact, GenerationError, GenerationProvider, GenerationRequest, http_client,
    provider_error,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-image-1";
/// Generation is synchronous on this API and can take minutes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Image payload found in a generations response.
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    Bytes(Vec<u8>),
    Url(String),
}

pub struct OpenAiImages {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    files_dir: PathBuf,
}

impl OpenAiImages {
    pub fn new(api_key: impl Into<String>, files_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: http_client(REQUEST_TIMEOUT),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            default_model: DEFAULT_MODEL.into(),
            files_dir: files_dir.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

/// Pull the first image out of an Images API response body.
pub fn decode_image_response(body: &serde_json::Value) -> Result<ImagePayload, GenerationError> {
    let data = body
        .pointer("/data/0")
        .ok_or_else(|| GenerationError::InvalidResponse("no image in response".into()))?;

    if let Some(b64) = data.get("b64_json").and_then(|v| v.as_str()) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| GenerationError::InvalidResponse(format!("bad base64 image: {e}")))?;
        return Ok(ImagePayload::Bytes(bytes));
    }

    data.get("url")
        .and_then(|v| v.as_str())
        .map(|u| ImagePayload::Url(u.to_string()))
        .ok_or_else(|| GenerationError::InvalidResponse("image has neither b64_json nor url".into()))
}

/// Write image bytes under `files_dir` and return the URL clients use.
pub async fn store_image(
    files_dir: &Path,
    correlation_id: &str,
    bytes: &[u8],
) -> Result<String, GenerationError> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let name = format!("image_{}_{}.png", sanitize_id(correlation_id), &id[..8]);

    tokio::fs::create_dir_all(files_dir)
        .await
        .map_err(|e| GenerationError::Storage(e.to_string()))?;
    tokio::fs::write(files_dir.join(&name), bytes)
        .await
        .map_err(|e| GenerationError::Storage(e.to_string()))?;

    Ok(format!("/files/{name}"))
}

#[async_trait]
impl GenerationProvider for OpenAiImages {
    fn id(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let mut body = json!({
            "model": model,
            "prompt": request.prompt,
            "n": 1,
            "size": format!("{}x{}", request.width, request.height),
        });
        // gpt-image models always return base64 and reject this field.
        if model.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
        }
        if let Some(obj) = body.as_object_mut() {
            for (k, v) in &request.params {
                obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::transport)?;

        if !response.status().is_success() {
            return Err(provider_error(self.id(), response).await);
        }

        let body: serde_json::Value = response.json().await.map_err(GenerationError::transport)?;
        let url = match decode_image_response(&body)? {
            ImagePayload::Bytes(bytes) => {
                let url = store_image(&self.files_dir, &request.correlation_id, &bytes).await?;
                info!(
                    correlation_id = %request.correlation_id,
                    size_kb = bytes.len() / 1024,
                    model,
                    url = %url,
                    "Image generated (OpenAI)"
                );
                url
            }
            ImagePayload::Url(url) => url,
        };

        Ok(GeneratedArtifact {
            mime_type: "image/png".into(),
            width: request.width,
            height: request.height,
            url,
        })
    }
}
