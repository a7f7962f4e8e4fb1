//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Palette configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas: Option<CanvasConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Providers ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// Configuration for a single language-model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Agent turn loop ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<u32>,

    /// Delay before retrying a rate-limited turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_backoff_ms: Option<u64>,

    /// How many times a rate-limited turn is retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_retries: Option<u32>,

    /// Run the tool calls of one turn concurrently.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

// --- Tools ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Seconds a confirmation may stay pending before it is denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_timeout_secs: Option<u64>,

    /// Interval of the background sweep over expired confirmations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_sweep_secs: Option<u64>,

    /// Tools that always need user approval.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_confirmation: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_generation: Option<ImageGenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_generation: Option<VideoGenerationConfig>,
}

/// Image generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationConfig {
    /// Provider: "openai" or "replicate" (default: "openai").
    #[serde(default = "default_imagegen_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Default model (e.g. "gpt-image-1", "black-forest-labs/flux-schnell").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Default image size (e.g. "1024x1024").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_size: Option<String>,

    /// Require user approval before generating.
    #[serde(default)]
    pub require_confirmation: bool,
}

fn default_imagegen_provider() -> String {
    "openai".into()
}

impl Default for ImageGenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_imagegen_provider(),
            api_key: None,
            api_key_env: None,
            default_model: None,
            default_size: None,
            require_confirmation: false,
        }
    }
}

impl ImageGenerationConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Video generation configuration. Video jobs are submitted and polled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoGenerationConfig {
    /// Provider: "replicate" (default).
    #[serde(default = "default_videogen_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    #[serde(default = "default_video_width")]
    pub width: u32,

    #[serde(default = "default_video_height")]
    pub height: u32,

    /// Require user approval before generating (default: true, videos are slow and costly).
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
}

fn default_videogen_provider() -> String {
    "replicate".into()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_polls() -> u32 {
    150
}

fn default_video_width() -> u32 {
    1280
}

fn default_video_height() -> u32 {
    720
}

fn default_true() -> bool {
    true
}

impl Default for VideoGenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_videogen_provider(),
            api_key: None,
            api_key_env: None,
            default_model: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            width: default_video_width(),
            height: default_video_height(),
            require_confirmation: true,
        }
    }
}

impl VideoGenerationConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Canvas / storage / gateway ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Horizontal gap between consecutively placed media elements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_spacing: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_x: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_y: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Data directory (default: `~/.palette/data`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Allow cross-origin requests (for a UI served elsewhere).
    #[serde(default)]
    pub cors: bool,
}

fn default_port() -> u16 {
    8787
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "palette_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::PaletteError::Io)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5), substituting `${ENV_VAR}` references.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted)
            .map_err(|e| crate::error::PaletteError::Config(e.to_string()))
    }

    /// Resolve the default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    fn agent(&self) -> Option<&AgentConfig> {
        self.agent.as_ref()
    }

    fn tools(&self) -> Option<&ToolsConfig> {
        self.tools.as_ref()
    }

    /// Get the gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or_else(default_port)
    }

    /// Get the gateway bind address.
    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Get the default model name: agent setting first, then the first provider's default.
    pub fn default_model(&self) -> String {
        self.agent()
            .and_then(|a| a.model.clone())
            .or_else(|| self.first_provider().and_then(|p| p.default_model.clone()))
            .unwrap_or_else(|| "gpt-4o".to_string())
    }

    pub fn system_prompt(&self) -> Option<String> {
        self.agent().and_then(|a| a.system_prompt.clone())
    }

    /// Get the default max_tokens.
    pub fn max_tokens(&self) -> u32 {
        self.agent().and_then(|a| a.max_tokens).unwrap_or(4096)
    }

    /// Get temperature setting.
    pub fn temperature(&self) -> Option<f64> {
        self.agent().and_then(|a| a.temperature)
    }

    /// Get the max tool iterations per turn.
    pub fn max_tool_iterations(&self) -> u32 {
        self.agent()
            .and_then(|a| a.max_tool_iterations)
            .unwrap_or(10)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(
            self.agent()
                .and_then(|a| a.rate_limit_backoff_ms)
                .unwrap_or(2_000),
        )
    }

    pub fn rate_limit_retries(&self) -> u32 {
        self.agent().and_then(|a| a.rate_limit_retries).unwrap_or(1)
    }

    pub fn parallel_tool_calls(&self) -> bool {
        self.agent()
            .and_then(|a| a.parallel_tool_calls)
            .unwrap_or(true)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(
            self.tools()
                .and_then(|t| t.confirmation_timeout_secs)
                .unwrap_or(300),
        )
    }

    /// Never shorter than one second; a zero period would stall the sweeper.
    pub fn confirmation_sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.tools()
                .and_then(|t| t.confirmation_sweep_secs)
                .unwrap_or(30)
                .max(1),
        )
    }

    /// Tool names configured to require confirmation.
    pub fn confirmation_required_tools(&self) -> Vec<String> {
        self.tools()
            .map(|t| t.require_confirmation.clone())
            .unwrap_or_default()
    }

    pub fn canvas_spacing(&self) -> f64 {
        self.canvas
            .as_ref()
            .and_then(|c| c.element_spacing)
            .unwrap_or(20.0)
    }

    pub fn canvas_origin(&self) -> (f64, f64) {
        let canvas = self.canvas.as_ref();
        (
            canvas.and_then(|c| c.origin_x).unwrap_or(0.0),
            canvas.and_then(|c| c.origin_y).unwrap_or(0.0),
        )
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.storage
            .as_ref()
            .map(|s| s.backend)
            .unwrap_or_default()
    }

    /// Data directory for histories, canvases and generated files.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.dir.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("data"))
    }

    /// Directory generated files are written to and served from.
    pub fn files_dir(&self) -> PathBuf {
        self.storage_dir().join("files")
    }

    /// Find a provider config by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers().iter().find(|pc| pc.id == id)
    }

    /// Get the first provider config.
    pub fn first_provider(&self) -> Option<&ProviderConfig> {
        self.providers().first()
    }

    pub fn providers(&self) -> &[ProviderConfig] {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_deref())
            .unwrap_or(&[])
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "agent.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.providers().is_empty() {
            warnings.push("No language-model providers configured".to_string());
        }

        // Check providers for API keys (skip ollama)
        for p in self.providers() {
            if p.id != "ollama" && p.resolve_api_key().is_none() {
                warnings.push(format!("Provider '{}' has no API key configured", p.id));
            }
            if !matches!(p.id.as_str(), "openai" | "openrouter" | "ollama") && p.base_url.is_none()
            {
                errors.push(format!(
                    "Provider '{}' is not a known provider and has no base_url",
                    p.id
                ));
            }
        }

        if let Some(img) = self.tools().and_then(|t| t.image_generation.as_ref()) {
            if !matches!(img.provider.as_str(), "openai" | "replicate") {
                errors.push(format!("Unknown image generation provider '{}'", img.provider));
            }
            if img.resolve_api_key().is_none() {
                warnings.push("Image generation has no API key configured".to_string());
            }
        }

        if let Some(video) = self.tools().and_then(|t| t.video_generation.as_ref()) {
            if video.provider != "replicate" {
                errors.push(format!(
                    "Unknown video generation provider '{}'",
                    video.provider
                ));
            }
            if video.max_polls == 0 {
                errors.push("tools.video_generation.max_polls cannot be 0".to_string());
            }
        }

        if self.tools().and_then(|t| t.confirmation_sweep_secs) == Some(0) {
            errors.push("tools.confirmation_sweep_secs cannot be 0".to_string());
        }

        if self.canvas_spacing() < 0.0 {
            errors.push("canvas.element_spacing cannot be negative".to_string());
        }

        // Check port is non-zero
        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Palette data: `~/.palette/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palette")
}
