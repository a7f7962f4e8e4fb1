//! Turn orchestration: streams the model, relays deltas, runs tool calls and
//! loops until the model answers without calling a tool.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use palette_canvas::CanvasService;
use palette_core::config::Config;
use palette_core::error::PaletteError;
use palette_core::protocol::{PushEvent, TurnStop};
use palette_core::push::PushChannels;
use palette_core::session::ModelSelection;
use palette_core::store::Store;
use palette_core::types::{FunctionCall, Message, Role, ToolCall};
use palette_providers::{
    CompletionRequest, DeltaReconstructor, ProviderFailure, ProviderRegistry, ReconstructedTurn,
    ResolvedModel, StreamEvent, ToolDefinition,
};
use palette_tools::ToolRegistry;

use crate::confirm::ConfirmationBroker;
use crate::dispatch::{DispatchOutcome, ToolDispatcher, TurnScope};

/// An inbound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    #[serde(default)]
    pub canvas_id: Option<String>,
    #[serde(default)]
    pub model: ModelSelection,
    /// Conversation so far, newest last.
    pub messages: Vec<Message>,
}

/// Why a turn failed.
#[derive(Debug, thiserror::Error)]
enum TurnError {
    #[error("{0}")]
    Provider(#[from] ProviderFailure),

    #[error("Failed to save conversation: {0}")]
    Storage(#[from] PaletteError),

    #[error("Stopped after {0} tool iterations without a final answer")]
    IterationLimit(u32),
}

enum Streamed {
    Turn(ReconstructedTurn),
    Cancelled,
}

pub struct AgentRuntime {
    config: Arc<Config>,
    providers: Arc<ProviderRegistry>,
    dispatcher: ToolDispatcher,
    store: Arc<dyn Store>,
    push: Arc<PushChannels>,
}

impl AgentRuntime {
    pub fn new(
        config: Arc<Config>,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        broker: Arc<ConfirmationBroker>,
        canvas: Arc<CanvasService>,
        push: Arc<PushChannels>,
    ) -> Self {
        let store = canvas.store().clone();
        Self {
            config,
            providers,
            dispatcher: ToolDispatcher::new(tools, broker, canvas, push.clone()),
            store,
            push,
        }
    }

    pub fn broker(&self) -> &Arc<ConfirmationBroker> {
        self.dispatcher.broker()
    }

    pub fn push(&self) -> &Arc<PushChannels> {
        &self.push
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Drive one turn to a terminal state. Emits exactly one `done` event;
    /// a failure is preceded by an `error` event.
    pub async fn run_turn(&self, request: TurnRequest, cancel: CancellationToken) -> TurnStop {
        let started = Instant::now();
        info!(
            session_id = %request.session_id,
            canvas_id = ?request.canvas_id,
            messages = request.messages.len(),
            "Turn started"
        );

        let stop = match self.drive(&request, &cancel).await {
            Ok(stop) => stop,
            Err(e) => {
                error!(session_id = %request.session_id, error = %e, "Turn failed");
                self.push.send(
                    &request.session_id,
                    PushEvent::Error {
                        message: e.to_string(),
                    },
                );
                TurnStop::Failed
            }
        };

        info!(
            session_id = %request.session_id,
            ?stop,
            duration_ms = started.elapsed().as_millis() as u64,
            "Turn finished"
        );
        self.push.send(&request.session_id, PushEvent::Done { stop });
        stop
    }

    async fn drive(
        &self,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnStop, TurnError> {
        let session_id = request.session_id.as_str();

        if let Some(last) = request.messages.last().filter(|m| m.role == Role::User) {
            self.store.append_message(session_id, last).await?;
        }

        let resolved = self.providers.resolve(&request.model)?;
        let tool_definitions: Vec<ToolDefinition> = self
            .dispatcher
            .tools()
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters_schema(),
            })
            .collect();

        let scope = TurnScope {
            session_id: request.session_id.clone(),
            canvas_id: request.canvas_id.clone(),
            cancel: cancel.clone(),
        };
        let mut conversation = request.messages.clone();
        let max_iterations = self.config.max_tool_iterations();

        for iteration in 0..max_iterations {
            if cancel.is_cancelled() {
                return Ok(TurnStop::Cancelled);
            }
            debug!(session_id, iteration, "Turn iteration");

            let completion = CompletionRequest {
                model: resolved.model.clone(),
                messages: conversation.clone(),
                max_tokens: self.config.max_tokens(),
                temperature: self.config.temperature(),
                tools: tool_definitions.clone(),
                system: self.config.system_prompt(),
            };

            let streamed = self
                .stream_with_retry(&resolved, &completion, session_id, cancel)
                .await?;
            let turn = match streamed {
                Streamed::Turn(turn) => turn,
                Streamed::Cancelled => return Ok(TurnStop::Cancelled),
            };

            for protocol_error in &turn.protocol_errors {
                warn!(session_id, error = %protocol_error, "Provider stream protocol error");
            }
            if let Some(usage) = turn.usage {
                debug!(
                    session_id,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Turn usage"
                );
            }

            let tool_calls: Vec<ToolCall> = turn
                .tool_calls
                .iter()
                .map(|c| ToolCall {
                    id: c.id.clone(),
                    kind: "function".into(),
                    function: FunctionCall {
                        name: c.name.clone(),
                        arguments: if c.raw_arguments.trim().is_empty() {
                            "{}".into()
                        } else {
                            c.raw_arguments.clone()
                        },
                    },
                })
                .collect();
            let assistant = Message::assistant(turn.text.clone(), tool_calls);
            self.store.append_message(session_id, &assistant).await?;
            conversation.push(assistant);

            if turn.tool_calls.is_empty() {
                return Ok(TurnStop::Completed);
            }

            let outcomes = if self.config.parallel_tool_calls() {
                futures::future::join_all(
                    turn.tool_calls
                        .iter()
                        .map(|call| self.dispatcher.dispatch(call, &scope)),
                )
                .await
            } else {
                let mut outcomes = Vec::with_capacity(turn.tool_calls.len());
                for call in &turn.tool_calls {
                    let outcome = self.dispatcher.dispatch(call, &scope).await;
                    let stop = outcome == DispatchOutcome::TurnCancelled;
                    outcomes.push(outcome);
                    if stop {
                        break;
                    }
                }
                outcomes
            };

            // Every call on the assistant message gets a tool message, so the
            // stored history stays valid for the next request.
            let mut cancelled = false;
            for (index, call) in turn.tool_calls.iter().enumerate() {
                let message = match outcomes.get(index) {
                    Some(DispatchOutcome::Finished(result)) => result.to_message(),
                    _ => {
                        cancelled = true;
                        Message::tool(&call.id, "Tool call cancelled")
                    }
                };
                self.store.append_message(session_id, &message).await?;
                conversation.push(message);
            }
            if cancelled {
                return Ok(TurnStop::Cancelled);
            }
        }

        Err(TurnError::IterationLimit(max_iterations))
    }

    /// Stream one model response, retrying rate-limited attempts after a
    /// fixed backoff.
    async fn stream_with_retry(
        &self,
        resolved: &ResolvedModel,
        completion: &CompletionRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Streamed, ProviderFailure> {
        let retries = self.config.rate_limit_retries();
        let backoff = self.config.rate_limit_backoff();
        let mut attempt = 0;

        loop {
            match self.stream_once(resolved, completion, session_id, cancel).await {
                Err(failure) if failure.is_rate_limited() && attempt < retries => {
                    attempt += 1;
                    warn!(
                        session_id,
                        provider = resolved.provider.id(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %failure,
                        "Rate limited, retrying turn"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Ok(Streamed::Cancelled),
                    }
                    // Output relayed by the failed attempt is void.
                    self.push.send(session_id, PushEvent::Retry { attempt });
                }
                other => return other,
            }
        }
    }

    async fn stream_once(
        &self,
        resolved: &ResolvedModel,
        completion: &CompletionRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Streamed, ProviderFailure> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Streamed::Cancelled),
            opened = resolved.provider.open_stream(completion, &resolved.credentials) => opened,
        };
        let mut stream = opened?;
        debug!(
            session_id,
            provider = resolved.provider.id(),
            model = %completion.model,
            "Provider stream opened"
        );

        let mut reconstructor = DeltaReconstructor::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Streamed::Cancelled),
                next = stream.next() => next,
            };
            let Some(frame) = next else { break };

            for event in reconstructor.feed(frame?) {
                self.push.send(session_id, relay_event(event));
            }
            if reconstructor.is_done() {
                break;
            }
        }

        reconstructor.finish().map(Streamed::Turn)
    }
}

fn relay_event(event: StreamEvent) -> PushEvent {
    match event {
        StreamEvent::TextDelta(text) => PushEvent::Delta { text },
        StreamEvent::ToolCallStarted { call_id, name, .. } => {
            PushEvent::ToolCall { id: call_id, name }
        }
        StreamEvent::ToolCallArgumentsDelta { call_id, text } => {
            PushEvent::ToolCallArguments { id: call_id, text }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use palette_canvas::LayoutPolicy;
    use palette_core::push::{Outbound, PushConnection};
    use palette_core::store::MemoryStore;
    use palette_providers::Credentials;
    use palette_canvas::MediaInsert;
    use palette_core::canvas::KIND_IMAGE;
    use palette_providers::scripted::{
        ScriptedProvider, ScriptedResponse, text_turn, tool_call_turn, tool_calls_turn,
    };
    use palette_tools::{Tool, ToolContext, ToolOutput};

    struct Recorder {
        calls: Mutex<Vec<serde_json::Value>>,
        gated: bool,
    }

    #[async_trait]
    impl Tool for Recorder {
        fn name(&self) -> &str {
            "generate_image"
        }

        fn description(&self) -> &str {
            "Generate an image"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"prompt": {"type": "string"}}})
        }

        fn requires_confirmation(&self) -> bool {
            self.gated
        }

        async fn execute(
            &self,
            params: serde_json::Value,
            context: &ToolContext,
        ) -> anyhow::Result<ToolOutput> {
            self.calls.lock().unwrap().push(params);
            if let Some(canvas_id) = &context.canvas_id {
                tokio::task::yield_now().await;
                let placed = context
                    .canvas
                    .insert_media(
                        canvas_id,
                        MediaInsert {
                            kind: KIND_IMAGE.into(),
                            url: "/files/test.png".into(),
                            mime_type: "image/png".into(),
                            width: 256.0,
                            height: 256.0,
                            extra: Default::default(),
                        },
                    )
                    .await?;
                return Ok(ToolOutput::ok(format!("Image generated at x={}", placed.element.x)));
            }
            Ok(ToolOutput::ok("Image generated"))
        }
    }

    struct Harness {
        runtime: AgentRuntime,
        provider: Arc<ScriptedProvider>,
        tool: Arc<Recorder>,
        rx: UnboundedReceiver<Outbound>,
    }

    impl Harness {
        fn events(&mut self) -> Vec<PushEvent> {
            let mut events = Vec::new();
            while let Ok(Outbound::Event(ev)) = self.rx.try_recv() {
                events.push(ev);
            }
            events
        }
    }

    fn harness(script: Vec<ScriptedResponse>, gated: bool, config: Config) -> Harness {
        let provider = Arc::new(ScriptedProvider::new(script));
        let mut providers = ProviderRegistry::new("scripted".into());
        providers.register(provider.clone(), Credentials::None, Some("test-model".into()));

        let tool = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            gated,
        });
        let mut tools = ToolRegistry::new();
        tools.register(tool.clone());

        let config = Arc::new(config);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let push = Arc::new(PushChannels::new());
        let (conn, rx) = PushConnection::new();
        push.register("s1", conn);

        let runtime = AgentRuntime::new(
            config.clone(),
            Arc::new(providers),
            Arc::new(tools),
            Arc::new(ConfirmationBroker::from_config(&config)),
            Arc::new(CanvasService::new(store, LayoutPolicy::default())),
            push,
        );
        Harness {
            runtime,
            provider,
            tool,
            rx,
        }
    }

    fn request(text: &str) -> TurnRequest {
        TurnRequest {
            session_id: "s1".into(),
            canvas_id: None,
            model: ModelSelection::default(),
            messages: vec![Message::user(text)],
        }
    }

    #[tokio::test]
    async fn test_text_turn_streams_deltas_then_done() {
        let mut h = harness(vec![text_turn(&["he", "llo", "!"])], false, Config::default());
        let stop = h.runtime.run_turn(request("hi"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Completed);

        let events = h.events();
        assert_eq!(
            events,
            vec![
                PushEvent::Delta { text: "he".into() },
                PushEvent::Delta { text: "llo".into() },
                PushEvent::Delta { text: "!".into() },
                PushEvent::Done {
                    stop: TurnStop::Completed
                },
            ]
        );

        let history = h.runtime.store().load_messages("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content.text(), "hello!");
        assert_eq!(h.provider.requests()[0].model, "test-model");
    }

    #[tokio::test]
    async fn test_streamed_tool_arguments_dispatched_once() {
        let mut h = harness(
            vec![
                tool_call_turn("call_1", "generate_image", &["{\"pro", "mpt\":\"c", "at", "\"}"]),
                text_turn(&["Here is your cat."]),
            ],
            false,
            Config::default(),
        );
        let stop = h.runtime.run_turn(request("draw a cat"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Completed);

        assert_eq!(*h.tool.calls.lock().unwrap(), vec![json!({"prompt": "cat"})]);

        let events = h.events();
        let arguments: String = events
            .iter()
            .filter_map(|e| match e {
                PushEvent::ToolCallArguments { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(arguments, r#"{"prompt":"cat"}"#);
        assert_eq!(
            events[0],
            PushEvent::ToolCall {
                id: "call_1".into(),
                name: "generate_image".into()
            }
        );
        assert!(events.contains(&PushEvent::ToolCallResult {
            id: "call_1".into(),
            content: "Image generated".into(),
            is_error: false,
        }));

        // The second request carries the assistant call and its result.
        let second = &h.provider.requests()[1];
        let roles: Vec<Role> = second.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
        assert_eq!(second.messages[1].tool_calls[0].function.arguments, r#"{"prompt":"cat"}"#);
        assert_eq!(second.tools[0].name, "generate_image");
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout_cancels_tool_call() {
        let mut h = harness(
            vec![
                tool_call_turn("call_9", "generate_image", &["{\"prompt\":\"cat\"}"]),
                text_turn(&["Okay, I won't."]),
            ],
            true,
            Config::default(),
        );
        let stop = h.runtime.run_turn(request("draw"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Completed);
        assert!(h.tool.calls.lock().unwrap().is_empty());

        let events = h.events();
        let names: Vec<&str> = events.iter().map(PushEvent::name).collect();
        let pending = names.iter().position(|n| *n == "tool_call_pending_confirmation").unwrap();
        let cancelled = names.iter().position(|n| *n == "tool_call_cancelled").unwrap();
        assert!(pending < cancelled);
        assert_eq!(names.last(), Some(&"done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_awaiting_confirmation() {
        let mut h = harness(
            vec![tool_call_turn("call_2", "generate_image", &["{}"])],
            true,
            Config::default(),
        );
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                cancel.cancel();
            })
        };

        let stop = h.runtime.run_turn(request("draw"), cancel).await;
        canceller.await.unwrap();
        assert_eq!(stop, TurnStop::Cancelled);
        assert!(h.tool.calls.lock().unwrap().is_empty());

        let events = h.events();
        assert_eq!(
            events.last(),
            Some(&PushEvent::Done {
                stop: TurnStop::Cancelled
            })
        );
        assert_eq!(events.iter().filter(|e| e.name() == "done").count(), 1);

        let history = h.runtime.store().load_messages("s1").await.unwrap();
        assert_eq!(history.last().unwrap().tool_call_id.as_deref(), Some("call_2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_once() {
        let mut h = harness(
            vec![
                ScriptedResponse::Fail(ProviderFailure::rate_limited("Rate limit reached")),
                text_turn(&["ok"]),
            ],
            false,
            Config::default(),
        );
        let stop = h.runtime.run_turn(request("hi"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Completed);
        assert_eq!(h.provider.requests().len(), 2);
        assert!(!h.events().iter().any(|e| e.name() == "error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausted_fails_turn() {
        let config = Config::parse("{ agent: { rate_limit_retries: 1 } }").unwrap();
        let mut h = harness(
            vec![
                ScriptedResponse::Fail(ProviderFailure::rate_limited("slow down")),
                ScriptedResponse::Fail(ProviderFailure::rate_limited("slow down")),
            ],
            false,
            config,
        );
        let stop = h.runtime.run_turn(request("hi"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Failed);
        assert_eq!(
            h.events(),
            vec![
                PushEvent::Retry { attempt: 1 },
                PushEvent::Error {
                    message: "slow down".into()
                },
                PushEvent::Done {
                    stop: TurnStop::Failed
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_mid_stream_resets_client_output() {
        let partial = ScriptedResponse::Body(vec![
            format!(
                "data: {}\n\n",
                json!({"choices": [{"index": 0, "delta": {"content": "Hel"}}]})
            ),
            format!(
                "data: {}\n\n",
                json!({"error": {"message": "Rate limit exceeded", "code": "rate_limit_exceeded"}})
            ),
        ]);
        let mut h = harness(vec![partial, text_turn(&["Hello"])], false, Config::default());
        let stop = h.runtime.run_turn(request("hi"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Completed);

        let events = h.events();
        let retry = events
            .iter()
            .position(|e| *e == PushEvent::Retry { attempt: 1 })
            .expect("no retry event");
        assert_eq!(events[..retry], [PushEvent::Delta { text: "Hel".into() }]);

        // What a client renders after discarding pre-retry output.
        let shown: String = events[retry..]
            .iter()
            .filter_map(|e| match e {
                PushEvent::Delta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(shown, "Hello");

        let history = h.runtime.store().load_messages("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content.text(), "Hello");
    }

    #[tokio::test]
    async fn test_parallel_calls_keep_call_order_and_do_not_overlap() {
        let mut h = harness(
            vec![
                tool_calls_turn(&[
                    ("call_a", "generate_image", &["{\"prompt\":\"cat\"}"]),
                    ("call_b", "generate_image", &["{\"prompt\":\"dog\"}"]),
                ]),
                text_turn(&["Two pictures."]),
            ],
            false,
            Config::default(),
        );
        assert!(h.runtime.config.parallel_tool_calls());
        let mut req = request("draw two");
        req.canvas_id = Some("c1".into());

        let stop = h.runtime.run_turn(req, CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Completed);
        assert_eq!(h.tool.calls.lock().unwrap().len(), 2);

        let history = h.runtime.store().load_messages("s1").await.unwrap();
        let tool_ids: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["call_a", "call_b"]);

        let results: Vec<String> = h
            .events()
            .into_iter()
            .filter_map(|e| match e {
                PushEvent::ToolCallResult { id, is_error, .. } => {
                    assert!(!is_error);
                    Some(id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);

        let doc = h.runtime.store().get_canvas_document("c1").await.unwrap();
        assert_eq!(doc.elements.len(), 2);
        let mut xs: Vec<f64> = doc.elements.iter().map(|e| e.x).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!(xs[1] >= xs[0] + 256.0, "elements overlap: {xs:?}");
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let mut h = harness(
            vec![ScriptedResponse::Fail(ProviderFailure::provider("Invalid API key"))],
            false,
            Config::default(),
        );
        let stop = h.runtime.run_turn(request("hi"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Failed);
        assert_eq!(h.provider.requests().len(), 1);
        let events = h.events();
        assert_eq!(
            events[0],
            PushEvent::Error {
                message: "Invalid API key".into()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let mut h = harness(vec![ScriptedResponse::Hang], false, Config::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let stop = h.runtime.run_turn(request("hi"), cancel).await;
        assert_eq!(stop, TurnStop::Cancelled);
        assert_eq!(
            h.events(),
            vec![PushEvent::Done {
                stop: TurnStop::Cancelled
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let mut h = harness(
            vec![
                tool_call_turn("call_x", "paint", &["{}"]),
                text_turn(&["Sorry."]),
            ],
            false,
            Config::default(),
        );
        let stop = h.runtime.run_turn(request("paint"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Completed);
        assert!(h.events().contains(&PushEvent::ToolCallResult {
            id: "call_x".into(),
            content: "Unknown tool: paint".into(),
            is_error: true,
        }));
        let tool_message = &h.provider.requests()[1].messages[2];
        assert_eq!(tool_message.content.text(), "Unknown tool: paint");
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let config = Config::parse("{ agent: { max_tool_iterations: 1 } }").unwrap();
        let mut h = harness(
            vec![tool_call_turn("call_1", "generate_image", &["{}"])],
            false,
            config,
        );
        let stop = h.runtime.run_turn(request("loop"), CancellationToken::new()).await;
        assert_eq!(stop, TurnStop::Failed);
        assert!(h.events().iter().any(|e| e.name() == "error"));
    }
}
