//! HTTP routes exercised through the router without binding a port.

mod common;

use axum::body::{ to_bytes, Body };
use axum::http::{ Request, StatusCode };
use common::{ spawn_fake_ollama, unreachable_url };
use ollama_chat::llm::chat::new_client;
use ollama_chat::llm::ModelConfig;
use ollama_chat::render::Renderer;
use ollama_chat::server::api::router;
use ollama_chat::server::AppContext;
use ollama_chat::session::SessionOptions;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn context(url: &str) -> Arc<AppContext> {
    Arc::new(AppContext {
        client: new_client(url).unwrap(),
        renderer: Renderer::new(),
        defaults: ModelConfig::new("m1", 0.7, 4096).unwrap(),
        options: SessionOptions::default(),
        ws_port: 9999,
    })
}

async fn get(url: &str, path: &str) -> (StatusCode, Vec<u8>) {
    let response = router(context(url))
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap()).await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn index_serves_chat_page() {
    let (status, body) = get(&unreachable_url(), "/").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("<title>Ollama Chat</title>"));
    assert!(html.contains("/api/config"));
}

#[tokio::test]
async fn health_and_config() {
    let (status, body) = get(&unreachable_url(), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");

    let (status, body) = get(&unreachable_url(), "/api/config").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["ws_port"], 9999);
    assert_eq!(json["default_model"], "m1");
    assert_eq!(json["context_length"], 4096);
}

#[tokio::test]
async fn models_are_proxied_from_server() {
    let server = spawn_fake_ollama().await;
    let (status, body) = get(&server.url, "/api/models").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["models"], serde_json::json!(["m1", "m2"]));
}

#[tokio::test]
async fn models_report_bad_gateway_when_unreachable() {
    let (status, body) = get(&unreachable_url(), "/api/models").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["kind"], "connection");
}
