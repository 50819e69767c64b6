//! End-to-end: browser-side WebSocket client, session server, fake model server.

mod common;

use common::spawn_fake_ollama;
use futures::{ SinkExt, StreamExt };
use ollama_chat::llm::chat::new_client;
use ollama_chat::llm::ModelConfig;
use ollama_chat::render::Renderer;
use ollama_chat::server::{ websocket, AppContext };
use ollama_chat::session::SessionOptions;
use serde_json::{ json, Value };
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{ TcpListener, TcpStream };
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{ connect_async, MaybeTlsStream, WebSocketStream };

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(model_server: &str) -> Client {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let context = Arc::new(AppContext {
        client: new_client(model_server).unwrap(),
        renderer: Renderer::new(),
        defaults: ModelConfig::new("m1", 0.7, 4096).unwrap(),
        options: SessionOptions::default(),
        ws_port: port,
    });
    tokio::spawn(async move {
        let _ = websocket::serve(listener, context).await;
    });
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}", port)).await.expect("connect should succeed");
    ws
}

async fn send(ws: &mut Client, msg: Value) {
    ws.send(Message::Text(msg.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next()).await
            .expect("server should answer")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Reads messages until one of the given type arrives, returning everything read.
async fn read_until(ws: &mut Client, kind: &str) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        let msg = next_json(ws).await;
        let done = msg["type"] == kind;
        seen.push(msg);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn connection_starts_with_empty_transcript() {
    let server = spawn_fake_ollama().await;
    let mut ws = start(&server.url).await;

    let opening = read_until(&mut ws, "state").await;
    assert_eq!(opening[0]["type"], "transcript");
    assert_eq!(opening[0]["turns"], 0);
    assert_eq!(opening[1]["model"], "m1");
    assert_eq!(opening[1]["status"], "idle");
}

#[tokio::test]
async fn chat_streams_chunks_then_transcript() {
    let server = spawn_fake_ollama().await;
    let mut ws = start(&server.url).await;
    read_until(&mut ws, "state").await;

    send(&mut ws, json!({ "type": "chat", "content": "Hello" })).await;
    let messages = read_until(&mut ws, "state").await;

    assert_eq!(messages[0]["type"], "processing");
    let chunks: String = messages
        .iter()
        .filter(|m| m["type"] == "chunk")
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(chunks, "Hi there");

    let response = messages.iter().find(|m| m["type"] == "response").unwrap();
    assert_eq!(response["content"], "Hi there");
    assert_eq!(response["model"], "m1");

    let transcript = messages.iter().find(|m| m["type"] == "transcript").unwrap();
    assert_eq!(transcript["turns"], 2);
    assert!(transcript["html"].as_str().unwrap().contains("Hi there"));
    assert_eq!(messages.last().unwrap()["message_count"], 2);
}

#[tokio::test]
async fn ghost_model_reports_error_without_turns() {
    let server = spawn_fake_ollama().await;
    let mut ws = start(&server.url).await;
    read_until(&mut ws, "state").await;

    send(&mut ws, json!({ "type": "switch_model", "model": "ghost" })).await;
    let messages = read_until(&mut ws, "state").await;
    assert_eq!(messages[0]["type"], "confirm_required");
    assert_eq!(messages[0]["action"], "switch_model");
    assert_eq!(messages[1]["pending"], "switch_model");
    assert_eq!(messages[1]["model"], "m1");

    send(&mut ws, json!({ "type": "confirm" })).await;
    let state = read_until(&mut ws, "state").await;
    assert_eq!(state.last().unwrap()["model"], "ghost");

    send(&mut ws, json!({ "type": "chat", "content": "Hello" })).await;
    let messages = read_until(&mut ws, "state").await;
    let error = messages.iter().find(|m| m["type"] == "error").unwrap();
    assert_eq!(error["kind"], "model_not_found");
    let last = messages.last().unwrap();
    assert_eq!(last["status"], "error");
    assert_eq!(last["message_count"], 0);
}

#[tokio::test]
async fn invalid_settings_are_rejected() {
    let server = spawn_fake_ollama().await;
    let mut ws = start(&server.url).await;
    read_until(&mut ws, "state").await;

    send(&mut ws, json!({ "type": "set_temperature", "value": 1.7 })).await;
    let messages = read_until(&mut ws, "state").await;
    assert_eq!(messages[0]["kind"], "validation");
    assert_eq!(messages[1]["temperature"], 0.7);

    send(&mut ws, json!({ "type": "set_context_length", "value": 0 })).await;
    let messages = read_until(&mut ws, "state").await;
    assert_eq!(messages[0]["type"], "error");
    assert_eq!(messages[1]["context_length"], 4096);

    send(&mut ws, json!({ "type": "set_context_length", "value": 8192 })).await;
    let messages = read_until(&mut ws, "state").await;
    assert_eq!(messages[0]["context_length"], 8192);

    send(&mut ws, json!({ "type": "chat", "content": "   " })).await;
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["kind"], "validation");
}

#[tokio::test]
async fn clear_history_needs_confirmation() {
    let server = spawn_fake_ollama().await;
    let mut ws = start(&server.url).await;
    read_until(&mut ws, "state").await;

    send(&mut ws, json!({ "type": "chat", "content": "Hello" })).await;
    read_until(&mut ws, "state").await;

    send(&mut ws, json!({ "type": "clear_history" })).await;
    let messages = read_until(&mut ws, "state").await;
    assert_eq!(messages[0]["type"], "confirm_required");
    assert_eq!(messages[1]["message_count"], 2);

    send(&mut ws, json!({ "type": "confirm" })).await;
    let messages = read_until(&mut ws, "state").await;
    assert_eq!(messages[0]["type"], "transcript");
    assert_eq!(messages[0]["turns"], 0);
    assert_eq!(messages[1]["message_count"], 0);
}

#[tokio::test]
async fn list_models_over_socket() {
    let server = spawn_fake_ollama().await;
    let mut ws = start(&server.url).await;
    read_until(&mut ws, "state").await;

    send(&mut ws, json!({ "type": "list_models" })).await;
    let models = next_json(&mut ws).await;
    assert_eq!(models["type"], "models");
    assert_eq!(models["models"], json!(["m1", "m2"]));
}
