//! Gateway shared state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use palette_agent::{AgentRuntime, ConfirmationBroker, StreamTaskRegistry};
use palette_canvas::CanvasService;
use palette_core::config::{Config, StorageBackend};
use palette_core::push::PushChannels;
use palette_core::store::{FileStore, MemoryStore, Store};
use palette_providers::ProviderRegistry;
use palette_tools::{ToolRegistry, register_builtin_tools};

use crate::error::ApiError;

/// Shared state accessible from all handlers and connections.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub runtime: Arc<AgentRuntime>,
    pub tasks: Arc<StreamTaskRegistry>,
    pub broker: Arc<ConfirmationBroker>,
    pub push: Arc<PushChannels>,
    pub canvas: Arc<CanvasService>,
    pub store: Arc<dyn Store>,
    /// Cancelled when the server stops; background jobs watch it.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let push = Arc::new(PushChannels::new());
        let broker = Arc::new(ConfirmationBroker::from_config(&config));
        let canvas = Arc::new(CanvasService::from_config(store.clone(), &config));
        let runtime = Arc::new(AgentRuntime::new(
            config.clone(),
            providers,
            tools,
            broker.clone(),
            canvas.clone(),
            push.clone(),
        ));

        Self {
            config,
            runtime,
            tasks: Arc::new(StreamTaskRegistry::new()),
            broker,
            push,
            canvas,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the store, providers and tools described by `config`.
    pub fn from_config(config: Config) -> Self {
        let store: Arc<dyn Store> = match config.storage_backend() {
            StorageBackend::File => {
                let dir = config.storage_dir();
                info!(dir = %dir.display(), "Using file store");
                Arc::new(FileStore::new(dir))
            }
            StorageBackend::Memory => {
                info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let providers = Arc::new(ProviderRegistry::from_config(&config));
        let mut tools = ToolRegistry::new();
        register_builtin_tools(&mut tools, &config);

        Self::new(Arc::new(config), store, providers, Arc::new(tools))
    }

    /// Approve or deny a pending tool call on behalf of `session_id`.
    ///
    /// A call owned by another session is reported as not found.
    pub fn resolve_confirmation(
        &self,
        session_id: &str,
        tool_call_id: &str,
        confirmed: bool,
    ) -> Result<&'static str, ApiError> {
        let not_found =
            || ApiError::NotFound(format!("No pending confirmation for tool call {tool_call_id}"));

        if self.broker.session_of(tool_call_id).as_deref() != Some(session_id) {
            return Err(not_found());
        }
        let resolved = if confirmed {
            self.broker.approve(tool_call_id)
        } else {
            self.broker.deny(tool_call_id)
        };
        if !resolved {
            return Err(not_found());
        }
        Ok(if confirmed { "approved" } else { "denied" })
    }
}
