//! Axum HTTP + WebSocket server.

use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use palette_agent::TurnRequest;

use crate::connection::handle_ws_connection;
use crate::error::ApiError;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
struct CancelRequest {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmationRequestBody {
    session_id: String,
    tool_call_id: String,
    confirmed: bool,
}

/// Routes of the gateway, without the listener.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let files_dir = state.config.files_dir();
    let cors = state.config.gateway.as_ref().is_some_and(|g| g.cors);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/cancel", post(cancel_handler))
        .route("/api/tool_confirmation", post(confirmation_handler))
        .route("/api/canvas/{canvas_id}", get(canvas_handler))
        .route("/api/sessions/{session_id}/messages", get(messages_handler))
        .route("/ws/{session_id}", get(ws_handler))
        .nest_service("/files", ServeDir::new(files_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve until Ctrl+C or until `state.shutdown` is cancelled.
///
/// Running turns are cancelled on the way out.
pub async fn start_gateway(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let sweeper = state.broker.clone().spawn_sweeper(
        state.config.confirmation_sweep_interval(),
        state.shutdown.clone(),
    );

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    let result = axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await;

    state.tasks.cancel_all();
    state.shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(%e, "Confirmation sweeper failed");
    }
    info!("Gateway stopped");

    result?;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received"),
        _ = shutdown.cancelled() => info!("Shutdown requested"),
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.push.len(),
        "active_turns": state.tasks.active_sessions().len(),
    }))
}

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<TurnRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id is required".into()));
    }
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".into()));
    }

    let session_id = request.session_id.clone();
    let runtime = state.runtime.clone();
    state.tasks.start(&session_id, move |cancel| async move {
        runtime.run_turn(request, cancel).await;
    })?;

    info!(session_id = %session_id, "Chat turn accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "session_id": session_id})),
    ))
}

async fn cancel_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<CancelRequest>,
) -> Json<Value> {
    let cancelled = state.tasks.cancel(&request.session_id);
    Json(json!({"cancelled": cancelled}))
}

async fn confirmation_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<ConfirmationRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let status =
        state.resolve_confirmation(&body.session_id, &body.tool_call_id, body.confirmed)?;
    Ok(Json(json!({"status": status})))
}

async fn canvas_handler(
    State(state): State<Arc<GatewayState>>,
    Path(canvas_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state.canvas.document(&canvas_id).await?;
    Ok(Json(document))
}

async fn messages_handler(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let messages = state.store.load_messages(&session_id).await?;
    Ok(Json(json!({"session_id": session_id, "messages": messages})))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket, session_id))
}
