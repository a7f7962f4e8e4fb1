//! Push channel wire protocol.
//!
//! Server -> client traffic is a sequence of [`PushEvent`]s, one JSON text frame
//! each, tagged by `type`. Clients may send [`ClientFrame`]s back on the same socket.

use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasElement, FileMeta};

/// How a turn ended. Carried by the `done` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStop {
    Completed,
    Failed,
    Cancelled,
}

/// Session-scoped event pushed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// Assistant text delta.
    Delta { text: String },

    /// The model started a tool call.
    ToolCall { id: String, name: String },

    /// A fragment of a tool call's JSON arguments.
    ToolCallArguments { id: String, text: String },

    /// A tool call finished (successfully or not).
    ToolCallResult {
        id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// A tool call is waiting for the user to approve it.
    ToolCallPendingConfirmation {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolCallConfirmed { id: String },

    ToolCallCancelled { id: String },

    ImageGenerated {
        canvas_id: String,
        element: CanvasElement,
        file: FileMeta,
    },

    VideoGenerated {
        canvas_id: String,
        element: CanvasElement,
        file: FileMeta,
    },

    /// The model stream is being retried from scratch. Clients drop any
    /// `delta`/`tool_call*` output received since the last model request.
    Retry { attempt: u32 },

    /// Human-readable error for the current turn.
    Error { message: String },

    /// Terminal event; exactly one per turn.
    Done { stop: TurnStop },
}

impl PushEvent {
    /// Event name as it appears in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::Delta { .. } => "delta",
            PushEvent::ToolCall { .. } => "tool_call",
            PushEvent::ToolCallArguments { .. } => "tool_call_arguments",
            PushEvent::ToolCallResult { .. } => "tool_call_result",
            PushEvent::ToolCallPendingConfirmation { .. } => "tool_call_pending_confirmation",
            PushEvent::ToolCallConfirmed { .. } => "tool_call_confirmed",
            PushEvent::ToolCallCancelled { .. } => "tool_call_cancelled",
            PushEvent::ImageGenerated { .. } => "image_generated",
            PushEvent::VideoGenerated { .. } => "video_generated",
            PushEvent::Retry { .. } => "retry",
            PushEvent::Error { .. } => "error",
            PushEvent::Done { .. } => "done",
        }
    }
}

/// Frames a client may send over its push socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ToolConfirmation { tool_call_id: String, confirmed: bool },
    Cancel,
    Ping,
}

/// Error body returned by the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}
