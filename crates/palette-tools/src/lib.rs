//! Tools exposed to the model during a turn.
//!
//! Each tool implements the [`Tool`] trait. The [`ToolRegistry`] is built once
//! at startup and maps a tool name to its implementation.

pub mod generation;
pub mod image_generation;
pub mod media;
pub mod openai_images;
pub mod polling;
pub mod replicate;
pub mod video_generation;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use palette_canvas::CanvasService;
use palette_core::config::Config;
use palette_core::push::PushChannels;

pub use generation::{
    GeneratedArtifact, GenerationError, GenerationProvider, GenerationRequest, MediaKind,
};
pub use image_generation::ImageGenerationTool;
pub use polling::{JobApi, JobStatus, PollingGenerator, PollingPolicy};
pub use video_generation::VideoGenerationTool;

/// Context provided to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Canvas the session draws on, if any.
    pub canvas_id: Option<String>,
    /// Id of the tool call being executed.
    pub call_id: String,
    pub canvas: Arc<CanvasService>,
    pub push: Arc<PushChannels>,
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// The core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the LLM (e.g., "generate_image").
    fn name(&self) -> &str;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether the user must approve each call before it runs.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Execute the tool. Business failures come back as an error
    /// [`ToolOutput`]; an `Err` is wrapped by the dispatcher.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput>;
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    confirmation: HashSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Gate `name` behind user confirmation regardless of what the tool declares.
    pub fn require_confirmation(&mut self, name: impl Into<String>) {
        self.confirmation.insert(name.into());
    }

    /// True if calls to `name` must be approved first.
    pub fn needs_confirmation(&self, name: &str) -> bool {
        self.confirmation.contains(name)
            || self
                .tools
                .get(name)
                .is_some_and(|t| t.requires_confirmation())
    }

    /// Tools in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        let mut tools: Vec<&Arc<dyn Tool>> = self.tools.values().collect();
        tools.sort_unstable_by(|a, b| a.name().cmp(b.name()));
        tools.into_iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Register `generate_image` and `generate_video` with the providers the
/// config enables. A tool whose provider has no credentials is still
/// registered and reports that it is not configured when called.
pub fn register_builtin_tools(registry: &mut ToolRegistry, config: &Config) {
    let tools_config = config.tools.clone().unwrap_or_default();

    let image_provider = image_generation::provider_from_config(config);
    if image_provider.is_none() {
        info!("Image generation has no credentials; generate_image will report it");
    }
    registry.register(Arc::new(ImageGenerationTool::new(
        image_provider,
        tools_config.image_generation.clone(),
    )));

    let video_provider = video_generation::provider_from_config(config);
    if video_provider.is_none() {
        info!("Video generation has no credentials; generate_video will report it");
    }
    registry.register(Arc::new(VideoGenerationTool::new(
        video_provider,
        tools_config.video_generation.clone(),
    )));

    for name in config.confirmation_required_tools() {
        registry.require_confirmation(name);
    }

    info!(tools = ?registry.list(), "Built-in tools registered");
}
