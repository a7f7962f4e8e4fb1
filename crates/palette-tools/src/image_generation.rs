//! Image generation tool using OpenAI Images or Replicate.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use palette_core::config::{Config, ImageGenerationConfig};

use crate::generation::{GenerationProvider, GenerationRequest, MediaKind};
use crate::openai_images::OpenAiImages;
use crate::polling::{PollingGenerator, PollingPolicy};
use crate::replicate::ReplicateJobs;
use crate::{Tool, ToolContext, ToolOutput, media};

const DEFAULT_SIZE: &str = "1024x1024";
const DEFAULT_REPLICATE_IMAGE_MODEL: &str = "black-forest-labs/flux-schnell";

pub struct ImageGenerationTool {
    provider: Option<Arc<dyn GenerationProvider>>,
    config: ImageGenerationConfig,
}

impl ImageGenerationTool {
    pub fn new(
        provider: Option<Arc<dyn GenerationProvider>>,
        config: Option<ImageGenerationConfig>,
    ) -> Self {
        Self {
            provider,
            config: config.unwrap_or_default(),
        }
    }
}

/// Build the configured image provider, or `None` without credentials.
pub fn provider_from_config(config: &Config) -> Option<Arc<dyn GenerationProvider>> {
    let img = config
        .tools
        .as_ref()
        .and_then(|t| t.image_generation.clone())
        .unwrap_or_default();

    let env_var = match img.provider.as_str() {
        "replicate" => "REPLICATE_API_TOKEN",
        _ => "OPENAI_API_KEY",
    };
    let api_key = img
        .resolve_api_key()
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))?;

    match img.provider.as_str() {
        "openai" => {
            let mut provider = OpenAiImages::new(api_key, config.files_dir());
            if let Some(model) = &img.default_model {
                provider = provider.with_default_model(model);
            }
            Some(Arc::new(provider))
        }
        "replicate" => {
            let model = img
                .default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_REPLICATE_IMAGE_MODEL.into());
            Some(Arc::new(PollingGenerator::new(
                ReplicateJobs::new(api_key, model),
                PollingPolicy::default(),
            )))
        }
        other => {
            warn!(provider = other, "Unknown image generation provider");
            None
        }
    }
}

/// Parse a size string like "1024x1024" into (width, height).
pub(crate) fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

#[async_trait]
impl Tool for ImageGenerationTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generate an image from a text prompt. The image is placed on the user's canvas."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Text description of the image to generate"
                },
                "size": {
                    "type": "string",
                    "description": "Image size (e.g. '1024x1024', '1536x1024'). Default: 1024x1024"
                },
                "model": {
                    "type": "string",
                    "description": "Model name (e.g. 'gpt-image-1', 'dall-e-3')"
                }
            },
            "required": ["prompt"]
        })
    }

    fn requires_confirmation(&self) -> bool {
        self.config.require_confirmation
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let Some(prompt) = params
            .get("prompt")
            .and_then(|v| v.as_str())
            .filter(|p| !p.trim().is_empty())
        else {
            return Ok(ToolOutput::error("Missing required parameter 'prompt'"));
        };

        let Some(provider) = &self.provider else {
            return Ok(ToolOutput::error(
                "Image generation not configured. Set tools.image_generation.api_key in config or OPENAI_API_KEY environment variable.",
            ));
        };

        let size = params
            .get("size")
            .and_then(|v| v.as_str())
            .or(self.config.default_size.as_deref())
            .unwrap_or(DEFAULT_SIZE);
        let Some((width, height)) = parse_size(size) else {
            return Ok(ToolOutput::error(format!(
                "Invalid size '{size}', expected WIDTHxHEIGHT"
            )));
        };

        let model = params
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.config.default_model.clone());

        let request = GenerationRequest {
            correlation_id: context.call_id.clone(),
            kind: MediaKind::Image,
            prompt: prompt.to_string(),
            model: model.clone(),
            width,
            height,
            params: Default::default(),
        };
        let artifact = provider.generate(&request).await?;

        media::deliver(MediaKind::Image, &artifact, prompt, model.as_deref(), context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use palette_canvas::{CanvasService, LayoutPolicy};
    use palette_core::push::PushChannels;
    use palette_core::store::{MemoryStore, Store};

    use crate::generation::{GeneratedArtifact, GenerationError};

    #[derive(Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<GenerationRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl GenerationProvider for RecordingProvider {
        fn id(&self) -> &str {
            "recording"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GeneratedArtifact, GenerationError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(GenerationError::Provider {
                    provider: "recording".into(),
                    status: Some(400),
                    message: "content policy".into(),
                });
            }
            Ok(GeneratedArtifact {
                mime_type: "image/png".into(),
                width: request.width,
                height: request.height,
                url: format!("/files/{}.png", request.correlation_id),
            })
        }
    }

    fn context() -> ToolContext {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        ToolContext {
            session_id: "s1".into(),
            canvas_id: Some("c1".into()),
            call_id: "call_abc".into(),
            canvas: Arc::new(CanvasService::new(store, LayoutPolicy::default())),
            push: Arc::new(PushChannels::new()),
        }
    }

    #[test]
    fn test_parameters_schema_has_required_prompt() {
        let tool = ImageGenerationTool::new(None, None);
        let schema = tool.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("prompt")));
        assert!(!tool.requires_confirmation());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024x1024"), Some((1024, 1024)));
        assert_eq!(parse_size("512X768"), Some((512, 768)));
        assert_eq!(parse_size("0x10"), None);
        assert_eq!(parse_size("invalid"), None);
        assert_eq!(parse_size(""), None);
    }

    #[tokio::test]
    async fn test_missing_provider_returns_error() {
        let result = ImageGenerationTool::new(None, None)
            .execute(json!({"prompt": "a cat"}), &context())
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("not configured"));
    }

    #[tokio::test]
    async fn test_missing_prompt_is_business_error() {
        let provider = Arc::new(RecordingProvider::default());
        let tool = ImageGenerationTool::new(Some(provider.clone()), None);
        let result = tool.execute(json!({}), &context()).await.unwrap();
        assert!(result.is_error);
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generates_and_places_on_canvas() {
        let provider = Arc::new(RecordingProvider::default());
        let tool = ImageGenerationTool::new(Some(provider.clone()), None);
        let ctx = context();

        let result = tool
            .execute(json!({"prompt": "cat", "size": "512x256"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error, "{}", result.content);

        let requests = provider.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].correlation_id, "call_abc");
        assert_eq!((requests[0].width, requests[0].height), (512, 256));

        let doc = ctx.canvas.document("c1").await.unwrap();
        assert_eq!(doc.elements.len(), 1);
        assert_eq!(doc.elements[0].width, 512.0);
    }

    #[tokio::test]
    async fn test_provider_failure_propagates_typed() {
        let provider = Arc::new(RecordingProvider {
            fail: true,
            ..Default::default()
        });
        let tool = ImageGenerationTool::new(Some(provider), None);
        let err = tool
            .execute(json!({"prompt": "cat"}), &context())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<GenerationError>().is_some());
    }
}
