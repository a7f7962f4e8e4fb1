//! Gateway integration tests: start a real gateway and talk to it over HTTP + WS.
//!
//! Run with: `cargo test -p palette-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use palette_core::config::Config;
use palette_core::store::MemoryStore;
use palette_providers::scripted::{ScriptedProvider, ScriptedResponse, text_turn, tool_call_turn};
use palette_providers::{Credentials, ProviderRegistry};
use palette_tools::{ImageGenerationTool, ToolRegistry};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a gateway backed by a scripted model and return its state + port.
async fn start_test_gateway(
    script: Vec<ScriptedResponse>,
) -> (Arc<palette_gateway::GatewayState>, u16) {
    let port = find_free_port();

    let mut providers = ProviderRegistry::new("scripted".into());
    providers.register(
        Arc::new(ScriptedProvider::new(script)),
        Credentials::None,
        Some("test-model".into()),
    );

    // No generation backend: tool calls still go through the dispatcher
    // and come back as error results.
    let config = Config::default();
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ImageGenerationTool::new(None, None)));

    let state = Arc::new(palette_gateway::GatewayState::new(
        Arc::new(config),
        Arc::new(MemoryStore::new()),
        Arc::new(providers),
        Arc::new(tools),
    ));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = palette_gateway::start_gateway(state_clone, "127.0.0.1", port).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, port)
}

async fn connect(port: u16, session_id: &str) -> WsStream {
    let url = format!("ws://127.0.0.1:{port}/ws/{session_id}");
    let (ws, _) = connect_async(&url).await.expect("WS connect failed");
    ws
}

/// Wait until the push channel for `session_id` is registered.
async fn wait_registered(state: &palette_gateway::GatewayState, session_id: &str) {
    for _ in 0..50 {
        if state.push.is_connected(session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("push channel for {session_id} never registered");
}

/// Read events until (and including) `done`.
async fn read_until_done(ws: &mut WsStream) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .expect("socket error");
        let Message::Text(text) = msg else { continue };
        let event: Value = serde_json::from_str(text.as_str()).unwrap();
        let done = event["type"] == "done";
        events.push(event);
        if done {
            return events;
        }
    }
}

async fn post(port: u16, path: &str, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}{path}"))
        .json(&body)
        .send()
        .await
        .expect("request failed")
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_state, port) = start_test_gateway(vec![]).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_chat_streams_deltas_over_ws() {
    let (state, port) = start_test_gateway(vec![text_turn(&["Hel", "lo"])]).await;
    let mut ws = connect(port, "s1").await;
    wait_registered(&state, "s1").await;

    let resp = post(
        port,
        "/api/chat",
        json!({"session_id": "s1", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 202);

    let events = read_until_done(&mut ws).await;
    let text: String = events
        .iter()
        .filter(|e| e["type"] == "delta")
        .map(|e| e["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(text, "Hello");
    assert_eq!(events.last().unwrap()["stop"], "completed");
}

#[tokio::test]
async fn test_unconfigured_tool_reports_error_result() {
    let (state, port) = start_test_gateway(vec![
        tool_call_turn("call_1", "generate_image", &["{\"prompt\":", "\"a cat\"}"]),
        text_turn(&["Sorry, images are unavailable."]),
    ])
    .await;
    let mut ws = connect(port, "s1").await;
    wait_registered(&state, "s1").await;

    post(
        port,
        "/api/chat",
        json!({"session_id": "s1", "canvas_id": "c1", "messages": [{"role": "user", "content": "draw"}]}),
    )
    .await;

    let events = read_until_done(&mut ws).await;
    let result = events
        .iter()
        .find(|e| e["type"] == "tool_call_result")
        .expect("no tool result");
    assert_eq!(result["id"], "call_1");
    assert_eq!(result["is_error"], true);
    assert_eq!(events.last().unwrap()["stop"], "completed");
}

#[tokio::test]
async fn test_cancel_ends_turn() {
    let (state, port) = start_test_gateway(vec![ScriptedResponse::Hang]).await;
    let mut ws = connect(port, "s1").await;
    wait_registered(&state, "s1").await;

    post(
        port,
        "/api/chat",
        json!({"session_id": "s1", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;

    let busy = post(
        port,
        "/api/chat",
        json!({"session_id": "s1", "messages": [{"role": "user", "content": "again"}]}),
    )
    .await;
    assert_eq!(busy.status().as_u16(), 409);

    // Cancel over the socket rather than the HTTP endpoint.
    ws.send(Message::Text(json!({"type": "cancel"}).to_string().into()))
        .await
        .unwrap();

    let events = read_until_done(&mut ws).await;
    assert_eq!(events.last().unwrap()["stop"], "cancelled");

    for _ in 0..50 {
        if !state.tasks.is_active("s1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let resp = post(port, "/api/cancel", json!({"session_id": "s1"})).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_unknown_confirmation_returns_404() {
    let (_state, port) = start_test_gateway(vec![]).await;
    let resp = post(
        port,
        "/api/tool_confirmation",
        json!({"session_id": "s1", "tool_call_id": "call_missing", "confirmed": true}),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_empty_canvas() {
    let (_state, port) = start_test_gateway(vec![]).await;
    let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/canvas/c-empty"))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["elements"], json!([]));
}
