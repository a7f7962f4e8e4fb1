//! Video generation tool. Video jobs run on Replicate and are polled until done.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use palette_core::config::{Config, VideoGenerationConfig};

use crate::generation::{GenerationProvider, GenerationRequest, MediaKind};
use crate::polling::{PollingGenerator, PollingPolicy};
use crate::replicate::ReplicateJobs;
use crate::{Tool, ToolContext, ToolOutput, media};

const DEFAULT_VIDEO_MODEL: &str = "minimax/video-01";

pub struct VideoGenerationTool {
    provider: Option<Arc<dyn GenerationProvider>>,
    config: VideoGenerationConfig,
}

impl VideoGenerationTool {
    pub fn new(
        provider: Option<Arc<dyn GenerationProvider>>,
        config: Option<VideoGenerationConfig>,
    ) -> Self {
        Self {
            provider,
            config: config.unwrap_or_default(),
        }
    }
}

/// Build the configured video provider, or `None` without credentials.
pub fn provider_from_config(config: &Config) -> Option<Arc<dyn GenerationProvider>> {
    let video = config
        .tools
        .as_ref()
        .and_then(|t| t.video_generation.clone())
        .unwrap_or_default();

    if video.provider != "replicate" {
        warn!(provider = %video.provider, "Unknown video generation provider");
        return None;
    }

    let api_key = video.resolve_api_key().or_else(|| {
        std::env::var("REPLICATE_API_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())
    })?;
    let model = video
        .default_model
        .clone()
        .unwrap_or_else(|| DEFAULT_VIDEO_MODEL.into());
    let policy = PollingPolicy {
        interval: Duration::from_millis(video.poll_interval_ms),
        max_polls: video.max_polls,
    };

    Some(Arc::new(PollingGenerator::new(
        ReplicateJobs::new(api_key, model),
        policy,
    )))
}

/// Frame size for an aspect ratio, using the configured frame's long and short edges.
pub(crate) fn aspect_dimensions(aspect: &str, width: u32, height: u32) -> Option<(u32, u32)> {
    let long = width.max(height);
    let short = width.min(height);
    match aspect.trim() {
        "16:9" => Some((long, short)),
        "9:16" => Some((short, long)),
        "1:1" => Some((short, short)),
        _ => None,
    }
}

#[async_trait]
impl Tool for VideoGenerationTool {
    fn name(&self) -> &str {
        "generate_video"
    }

    fn description(&self) -> &str {
        "Generate a short video clip from a text prompt. The video is placed on the user's canvas. Takes a few minutes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Text description of the video to generate"
                },
                "aspect": {
                    "type": "string",
                    "enum": ["16:9", "9:16", "1:1"],
                    "description": "Aspect ratio. Default: 16:9"
                },
                "model": {
                    "type": "string",
                    "description": "Replicate model (e.g. 'minimax/video-01')"
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
                "Video generation not configured. Set tools.video_generation.api_key in config or REPLICATE_API_TOKEN environment variable.",
            ));
        };

        let aspect = params
            .get("aspect")
            .and_then(|v| v.as_str())
            .unwrap_or("16:9");
        let Some((width, height)) =
            aspect_dimensions(aspect, self.config.width, self.config.height)
        else {
            return Ok(ToolOutput::error(format!(
                "Unsupported aspect ratio '{aspect}', use 16:9, 9:16 or 1:1"
            )));
        };

        let model = params
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.config.default_model.clone());

        let request = GenerationRequest {
            correlation_id: context.call_id.clone(),
            kind: MediaKind::Video,
            prompt: prompt.to_string(),
            model: model.clone(),
            width,
            height,
            params: Default::default(),
        };
        let artifact = provider.generate(&request).await?;

        media::deliver(MediaKind::Video, &artifact, prompt, model.as_deref(), context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use palette_canvas::{CanvasService, LayoutPolicy};
    use palette_core::push::PushChannels;
    use palette_core::store::{MemoryStore, Store};

    use crate::generation::{GeneratedArtifact, GenerationError};

    struct FixedVideo;

    #[async_trait]
    impl GenerationProvider for FixedVideo {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GeneratedArtifact, GenerationError> {
            Ok(GeneratedArtifact {
                mime_type: "video/mp4".into(),
                width: request.width,
                height: request.height,
                url: "https://cdn.example.com/v.mp4".into(),
            })
        }
    }

    fn context() -> ToolContext {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        ToolContext {
            session_id: "s1".into(),
            canvas_id: Some("c1".into()),
            call_id: "call_v".into(),
            canvas: Arc::new(CanvasService::new(store, LayoutPolicy::default())),
            push: Arc::new(PushChannels::new()),
        }
    }

    #[test]
    fn test_aspect_dimensions() {
        assert_eq!(aspect_dimensions("16:9", 1280, 720), Some((1280, 720)));
        assert_eq!(aspect_dimensions("9:16", 1280, 720), Some((720, 1280)));
        assert_eq!(aspect_dimensions("1:1", 1280, 720), Some((720, 720)));
        assert_eq!(aspect_dimensions("4:3", 1280, 720), None);
    }

    #[test]
    fn test_requires_confirmation_by_default() {
        assert!(VideoGenerationTool::new(None, None).requires_confirmation());

        let config = VideoGenerationConfig {
            require_confirmation: false,
            ..Default::default()
        };
        assert!(!VideoGenerationTool::new(None, Some(config)).requires_confirmation());
    }

    #[tokio::test]
    async fn test_portrait_video_on_canvas() {
        let tool = VideoGenerationTool::new(Some(Arc::new(FixedVideo)), None);
        let ctx = context();
        let out = tool
            .execute(json!({"prompt": "rain", "aspect": "9:16"}), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error, "{}", out.content);

        let doc = ctx.canvas.document("c1").await.unwrap();
        assert_eq!(doc.elements[0].kind, "video");
        assert_eq!((doc.elements[0].width, doc.elements[0].height), (720.0, 1280.0));
    }

    #[tokio::test]
    async fn test_bad_aspect_is_business_error() {
        let tool = VideoGenerationTool::new(Some(Arc::new(FixedVideo)), None);
        let out = tool
            .execute(json!({"prompt": "rain", "aspect": "21:9"}), &context())
            .await
            .unwrap();
        assert!(out.is_error);
    }
}
