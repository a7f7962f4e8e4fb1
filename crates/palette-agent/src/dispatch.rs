//! Tool dispatcher: the only path from a model's tool call to a tool.
//!
//! Resolves the tool, gates it behind confirmation when required, runs it and
//! normalizes the result. Tool failures never escape: they become a tool
//! result the model can read.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use palette_canvas::CanvasService;
use palette_core::protocol::PushEvent;
use palette_core::push::PushChannels;
use palette_core::types::Message;
use palette_providers::CompletedToolCall;
use palette_tools::{GenerationError, ToolContext, ToolRegistry};

use crate::confirm::{ConfirmationBroker, ConfirmationOutcome, ConfirmationRequest};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Tool '{tool}' failed: {reason}")]
    Execution {
        tool: String,
        reason: String,
        /// The provider failure behind the error, when a generation provider raised it.
        provider: Option<GenerationError>,
    },

    #[error("Tool call was denied by the user")]
    ConfirmationDenied,

    #[error("Tool call was not confirmed in time")]
    ConfirmationTimeout,
}

/// Normalized result of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub content: String,
    pub is_error: bool,
    pub error: Option<ToolError>,
}

impl ToolResult {
    fn success(call: &CompletedToolCall, content: String, is_error: bool) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            content,
            is_error,
            error: None,
        }
    }

    fn failure(call: &CompletedToolCall, error: ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            content: error.to_string(),
            is_error: true,
            error: Some(error),
        }
    }

    /// The `tool` message appended to the conversation.
    pub fn to_message(&self) -> Message {
        Message::tool(&self.call_id, &self.content)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Finished(ToolResult),
    /// The turn was cancelled before the tool ran.
    TurnCancelled,
}

/// Where a turn runs: its session, canvas and cancellation signal.
#[derive(Debug, Clone)]
pub struct TurnScope {
    pub session_id: String,
    pub canvas_id: Option<String>,
    pub cancel: CancellationToken,
}

pub struct ToolDispatcher {
    tools: Arc<ToolRegistry>,
    broker: Arc<ConfirmationBroker>,
    canvas: Arc<CanvasService>,
    push: Arc<PushChannels>,
}

impl ToolDispatcher {
    pub fn new(
        tools: Arc<ToolRegistry>,
        broker: Arc<ConfirmationBroker>,
        canvas: Arc<CanvasService>,
        push: Arc<PushChannels>,
    ) -> Self {
        Self {
            tools,
            broker,
            canvas,
            push,
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn broker(&self) -> &Arc<ConfirmationBroker> {
        &self.broker
    }

    pub async fn dispatch(&self, call: &CompletedToolCall, scope: &TurnScope) -> DispatchOutcome {
        if scope.cancel.is_cancelled() {
            return DispatchOutcome::TurnCancelled;
        }

        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Model called an unknown tool");
            return self.finish(
                scope,
                ToolResult::failure(call, ToolError::NotFound(call.name.clone())),
            );
        };

        if self.tools.needs_confirmation(&call.name) {
            self.broker.request(ConfirmationRequest::new(
                &call.id,
                &scope.session_id,
                &call.name,
                call.arguments.clone(),
            ));
            self.push.send(
                &scope.session_id,
                PushEvent::ToolCallPendingConfirmation {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            );

            let cancelled = PushEvent::ToolCallCancelled { id: call.id.clone() };
            match self.broker.wait(&call.id, &scope.cancel).await {
                ConfirmationOutcome::Approved => {
                    self.push.send(
                        &scope.session_id,
                        PushEvent::ToolCallConfirmed { id: call.id.clone() },
                    );
                }
                ConfirmationOutcome::Denied => {
                    self.push.send(&scope.session_id, cancelled);
                    return self.finish(
                        scope,
                        ToolResult::failure(call, ToolError::ConfirmationDenied),
                    );
                }
                ConfirmationOutcome::TimedOut => {
                    self.push.send(&scope.session_id, cancelled);
                    return self.finish(
                        scope,
                        ToolResult::failure(call, ToolError::ConfirmationTimeout),
                    );
                }
                ConfirmationOutcome::Cancelled => {
                    self.push.send(&scope.session_id, cancelled);
                    return DispatchOutcome::TurnCancelled;
                }
            }

            if scope.cancel.is_cancelled() {
                return DispatchOutcome::TurnCancelled;
            }
        }

        info!(
            session_id = %scope.session_id,
            tool = %call.name,
            call_id = %call.id,
            "Tool call started"
        );
        let started = Instant::now();

        let context = ToolContext {
            session_id: scope.session_id.clone(),
            canvas_id: scope.canvas_id.clone(),
            call_id: call.id.clone(),
            canvas: self.canvas.clone(),
            push: self.push.clone(),
        };

        let result = match tool.execute(call.arguments.clone(), &context).await {
            Ok(output) => ToolResult::success(call, output.content, output.is_error),
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution error");
                ToolResult::failure(
                    call,
                    ToolError::Execution {
                        tool: call.name.clone(),
                        reason: format!("{e:#}"),
                        provider: e.downcast_ref::<GenerationError>().cloned(),
                    },
                )
            }
        };

        info!(
            session_id = %scope.session_id,
            tool = %call.name,
            call_id = %call.id,
            is_error = result.is_error,
            duration_ms = started.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        self.finish(scope, result)
    }

    fn finish(&self, scope: &TurnScope, result: ToolResult) -> DispatchOutcome {
        self.push.send(
            &scope.session_id,
            PushEvent::ToolCallResult {
                id: result.call_id.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            },
        );
        DispatchOutcome::Finished(result)
    }
}
