use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, Response, StatusCode };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use super::{ create_streaming_response, ChatClient, CompletionResponse, TextStream };
use crate::error::ChatError;
use crate::llm::ModelConfig;
use crate::models::chat::ChatMessage;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const LIST_MODELS_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: Url,
    connect_timeout: Duration,
    list_timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: RequestOptions,
}

#[derive(Serialize)]
struct RequestOptions {
    temperature: f64,
    num_ctx: u32,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Body of a non-streaming reply, and of every line of a streaming one.
#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Splits a byte stream into newline-terminated lines. Network chunks do not
/// respect line boundaries, so partial lines are held until completed.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        if line.is_empty() { None } else { Some(line) }
    }
}

#[derive(Debug, PartialEq)]
enum LineOutcome {
    Fragment(String),
    Done(Option<String>),
    Skip,
    Failed(ChatError),
}

fn parse_stream_line(line: &str, model: &str) -> LineOutcome {
    match serde_json::from_str::<ChatResponse>(line) {
        Ok(ChatResponse { error: Some(message), .. }) => {
            LineOutcome::Failed(classify_error_message(&message, model))
        }
        Ok(resp) => {
            let content = resp.message.map(|m| m.content).filter(|c| !c.is_empty());
            if resp.done {
                LineOutcome::Done(content)
            } else {
                content.map(LineOutcome::Fragment).unwrap_or(LineOutcome::Skip)
            }
        }
        Err(e) => {
            warn!("Skipping undecodable stream line ({}): {}", e, line);
            LineOutcome::Skip
        }
    }
}

fn classify_error_message(message: &str, model: &str) -> ChatError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("not found") && lower.contains("model") {
        ChatError::ModelNotFound(model.to_string())
    } else {
        ChatError::Server(message.to_string())
    }
}

impl OllamaClient {
    pub fn new(base_url: Url) -> Result<Self, ChatError> {
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let connect_timeout = Duration::from_secs(CONNECT_TIMEOUT_SECS);
        let http = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ChatError::Connection {
                host: base_url.as_str().trim_end_matches('/').to_string(),
                message: format!("Cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            base_url,
            connect_timeout,
            list_timeout: Duration::from_secs(LIST_MODELS_TIMEOUT_SECS),
        })
    }

    /// Upper bound on a whole model listing request, body included.
    pub fn with_list_timeout(mut self, limit: Duration) -> Self {
        self.list_timeout = limit;
        self
    }

    fn endpoint(&self, route: &str) -> Result<Url, ChatError> {
        self.base_url
            .join(route)
            .map_err(|e| ChatError::validation(format!("Invalid endpoint '{}': {}", route, e)))
    }

    fn host(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }

    fn map_transport_error(&self, err: reqwest::Error, limit: Duration) -> ChatError {
        if err.is_timeout() {
            ChatError::Timeout(limit.as_secs())
        } else if err.is_connect() || err.is_request() {
            ChatError::Connection {
                host: self.host(),
                message: err.to_string(),
            }
        } else {
            ChatError::Server(err.to_string())
        }
    }

    async fn check_status(response: Response, model: &str) -> Result<Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.trim().to_string());

        if status == StatusCode::NOT_FOUND {
            return Err(ChatError::ModelNotFound(model.to_string()));
        }
        match classify_error_message(&message, model) {
            ChatError::Server(_) => Err(ChatError::Server(format!("HTTP {}: {}", status, message))),
            other => Err(other),
        }
    }

    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig,
        stream: bool
    ) -> Result<Response, ChatError> {
        let url = self.endpoint("api/chat")?;
        let req = ChatRequest {
            model: config.model_name(),
            messages,
            stream,
            options: RequestOptions {
                temperature: config.temperature(),
                num_ctx: config.context_length(),
            },
        };
        debug!(
            "POST {} model={} temperature={} num_ctx={} messages={} stream={}",
            url,
            config.model_name(),
            config.temperature(),
            config.context_length(),
            messages.len(),
            stream
        );
        let response = self.http
            .post(url)
            .json(&req)
            .send().await
            .map_err(|e| self.map_transport_error(e, self.connect_timeout))?;
        Self::check_status(response, config.model_name()).await
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig
    ) -> Result<CompletionResponse, ChatError> {
        let response = self.send_chat(messages, config, false).await?;
        let data = response
            .json::<ChatResponse>().await
            .map_err(|e| ChatError::Server(format!("Invalid response body: {}", e)))?;
        if let Some(message) = data.error {
            return Err(classify_error_message(&message, config.model_name()));
        }
        Ok(CompletionResponse {
            response: data.message.map(|m| m.content).unwrap_or_default(),
        })
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig
    ) -> Result<TextStream, ChatError> {
        let response = self.send_chat(messages, config, true).await?;
        let model = config.model_name().to_string();
        let host = self.host();

        Ok(
            create_streaming_response(move |tx| async move {
                let mut bytes = response.bytes_stream();
                let mut decoder = NdjsonDecoder::default();

                'read: loop {
                    // Stop reading as soon as the consumer is gone, even if the server is silent.
                    let next = tokio::select! {
                        _ = tx.closed() => {
                            debug!("Stream from {} abandoned by consumer for model {}", host, model);
                            return;
                        }
                        next = bytes.next() => next,
                    };
                    let (lines, finished) = match next {
                        Some(Ok(chunk)) => (decoder.push(&chunk), false),
                        Some(Err(e)) => {
                            let err = ChatError::Connection {
                                host: host.clone(),
                                message: e.to_string(),
                            };
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                        None => (decoder.finish().into_iter().collect(), true),
                    };

                    for line in lines {
                        match parse_stream_line(&line, &model) {
                            LineOutcome::Fragment(text) => {
                                if tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                            LineOutcome::Done(last) => {
                                if let Some(text) = last {
                                    let _ = tx.send(Ok(text)).await;
                                }
                                break 'read;
                            }
                            LineOutcome::Skip => {}
                            LineOutcome::Failed(err) => {
                                let _ = tx.send(Err(err)).await;
                                return;
                            }
                        }
                    }

                    if finished {
                        warn!("Stream from {} ended without a done marker for model {}", host, model);
                        let err = ChatError::Server("stream ended before completion".to_string());
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
                debug!("Stream from {} finished for model {}", host, model);
            })
        )
    }

    async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let url = self.endpoint("api/tags")?;
        let response = self.http
            .get(url)
            .timeout(self.list_timeout)
            .send().await
            .map_err(|e| self.map_transport_error(e, self.list_timeout))?;
        if !response.status().is_success() {
            return Err(ChatError::Server(format!("HTTP {} listing models", response.status())));
        }
        let json = response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                ChatError::Timeout(self.list_timeout.as_secs())
            } else {
                ChatError::Server(format!("Invalid model list: {}", e))
            }
        })?;

        let mut names: Vec<String> = json
            .get("models")
            .and_then(|v| v.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|item| {
                        item.get("name")
                            .or_else(|| item.get("model"))
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut seen = HashSet::new();
        names.retain(|n| seen.insert(n.clone()));
        info!("Model server at {} reports {} model(s)", self.host(), names.len());
        Ok(names)
    }

    fn get_base_url(&self) -> String {
        self.base_url.to_string()
    }
}
