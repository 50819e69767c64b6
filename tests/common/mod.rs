//! In-process stand-in for an Ollama server, bound to an ephemeral port.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use serde_json::{ json, Value };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;

/// Splits the NDJSON body into chunks this small so lines straddle chunk boundaries.
const CHUNK_BYTES: usize = 7;

#[derive(Clone, Default)]
pub struct Recorded {
    requests: Arc<Mutex<Vec<Value>>>,
    silent_body_dropped: Arc<AtomicBool>,
}

impl Recorded {
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// True once the server has given up on a "silent" reply body,
    /// which only happens when the client closes the connection.
    pub fn silent_body_dropped(&self) -> bool {
        self.silent_body_dropped.load(Ordering::SeqCst)
    }

    pub async fn wait_for_silent_body_drop(&self) -> bool {
        for _ in 0..100 {
            if self.silent_body_dropped() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct FakeOllama {
    pub url: String,
    pub recorded: Recorded,
}

pub async fn spawn_fake_ollama() -> FakeOllama {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/tags", get(tags_handler))
        .route("/slow/api/tags", get(slow_tags_handler))
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    FakeOllama { url: format!("http://{}", addr), recorded }
}

/// A URL nothing is listening on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

pub const PYTHON_REPLY: &str = "Sure:\n```python\nprint(\"hi\")\n```\nThat prints hi.";

fn reply_for(prompt: &str) -> String {
    if prompt.contains("python") {
        PYTHON_REPLY.to_string()
    } else if prompt == "Hello" {
        "Hi there".to_string()
    } else {
        format!("echo: {}", prompt)
    }
}

fn stream_line(model: &str, content: &str, done: bool) -> String {
    let line = json!({
        "model": model,
        "message": { "role": "assistant", "content": content },
        "done": done,
    });
    format!("{}\n", line)
}

async fn tags_handler() -> Json<Value> {
    Json(json!({
        "models": [
            { "name": "m1", "size": 1 },
            { "model": "m2" },
            { "name": "m1" },
        ]
    }))
}

async fn slow_tags_handler() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    tags_handler().await
}

async fn chat_handler(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Response {
    recorded.requests.lock().unwrap().push(body.clone());

    let model = body["model"].as_str().unwrap_or_default().to_string();
    let stream = body["stream"].as_bool().unwrap_or(false);
    let prompt = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();

    if model == "ghost" {
        let error = format!("model \"{}\" not found, try pulling it first", model);
        return (StatusCode::NOT_FOUND, Json(json!({ "error": error }))).into_response();
    }

    let reply = reply_for(&prompt);
    if !stream {
        return Json(
            json!({
            "model": model,
            "message": { "role": "assistant", "content": reply },
            "done": true,
        })
        ).into_response();
    }

    if model == "silent" {
        // One fragment, then nothing until the client hangs up.
        let guard = DropFlag(recorded.silent_body_dropped.clone());
        let first = stream_line(&model, "Thinking", false).into_bytes();
        let body = futures::stream::unfold((Some(first), guard), |(first, guard)| async move {
            match first {
                Some(bytes) => Some((Ok::<Vec<u8>, std::io::Error>(bytes), (None, guard))),
                None => futures::future::pending().await,
            }
        });
        return Response::builder()
            .header("content-type", "application/x-ndjson")
            .body(Body::from_stream(body))
            .unwrap();
    }

    let mut ndjson = String::new();
    if model == "truncated" {
        ndjson.push_str(&stream_line(&model, "Half an ans", false));
    } else if model == "broken" {
        ndjson.push_str(&stream_line(&model, "partial", false));
        ndjson.push_str("{\"error\":\"model runner has unexpectedly stopped\"}\n");
    } else {
        let middle = reply.len() / 2;
        ndjson.push_str(&stream_line(&model, &reply[..middle], false));
        ndjson.push_str(&stream_line(&model, &reply[middle..], false));
        ndjson.push_str(&stream_line(&model, "", true));
    }

    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = ndjson
        .into_bytes()
        .chunks(CHUNK_BYTES)
        .map(|c| Ok(c.to_vec()))
        .collect();
    Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap()
}
