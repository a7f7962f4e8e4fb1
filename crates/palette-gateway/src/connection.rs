//! WebSocket connection lifecycle: one socket is a session's push channel.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use palette_core::protocol::{ClientFrame, PushEvent};
use palette_core::push::{Outbound, PushConnection};

use crate::state::GatewayState;

/// Run a push socket for `session_id` until either side closes it.
pub async fn handle_ws_connection(state: Arc<GatewayState>, socket: WebSocket, session_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (connection, mut outbound_rx) = PushConnection::new();
    let conn_id = connection.conn_id.clone();

    state.push.register(&session_id, connection);
    info!(session_id = %session_id, conn_id = %conn_id, "WebSocket connected");

    // A reconnecting client must still see the confirmations it owes us.
    for pending in state.broker.pending_for(&session_id) {
        state.push.send(
            &session_id,
            PushEvent::ToolCallPendingConfirmation {
                id: pending.tool_call_id,
                name: pending.tool_name,
                arguments: pending.arguments,
            },
        );
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            match item {
                Outbound::Event(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(%e, event = event.name(), "Failed to serialize push event");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => {
                debug!(conn_id = %conn_id, "Writer finished");
                break;
            }
            _ = state.shutdown.cancelled() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&state, &session_id, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id = %conn_id, "Client closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, %e, "WebSocket error");
                    break;
                }
                // Axum answers pings itself.
                Some(Ok(_)) => {}
            },
        }
    }

    send_task.abort();
    if state.push.unregister_connection(&session_id, &conn_id) {
        info!(session_id = %session_id, conn_id = %conn_id, "WebSocket disconnected");
    }
}

fn handle_client_frame(state: &GatewayState, session_id: &str, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(session_id, %e, "Invalid client frame");
            return;
        }
    };

    match frame {
        ClientFrame::ToolConfirmation {
            tool_call_id,
            confirmed,
        } => {
            if let Err(e) = state.resolve_confirmation(session_id, &tool_call_id, confirmed) {
                debug!(session_id, call_id = %tool_call_id, %e, "Confirmation ignored");
            }
        }
        ClientFrame::Cancel => {
            state.tasks.cancel(session_id);
        }
        ClientFrame::Ping => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use palette_agent::ConfirmationRequest;
    use palette_core::config::Config;
    use palette_core::store::MemoryStore;
    use palette_providers::ProviderRegistry;
    use palette_tools::ToolRegistry;
    use serde_json::json;

    fn state() -> GatewayState {
        GatewayState::new(
            Arc::new(Config::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(ProviderRegistry::new("none".into())),
            Arc::new(ToolRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_confirmation_frame_resolves_own_session_only() {
        let state = state();
        state.broker.request(ConfirmationRequest::new(
            "call_1",
            "s1",
            "generate_video",
            json!({}),
        ));

        let frame = r#"{"type":"tool_confirmation","tool_call_id":"call_1","confirmed":true}"#;
        handle_client_frame(&state, "s2", frame);
        assert_eq!(state.broker.pending_for("s1").len(), 1);

        handle_client_frame(&state, "s1", frame);
        assert!(state.broker.pending_for("s1").is_empty());
    }

    #[tokio::test]
    async fn test_cancel_frame_and_garbage() {
        let state = state();
        let handle = state
            .tasks
            .start("s1", |token| async move { token.cancelled().await })
            .unwrap();

        handle_client_frame(&state, "s1", "not json");
        assert!(state.tasks.is_active("s1"));

        handle_client_frame(&state, "s1", r#"{"type":"cancel"}"#);
        handle.await.unwrap();
        assert!(!state.tasks.is_active("s1"));
    }
}
