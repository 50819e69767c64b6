pub mod ollama;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use super::ModelConfig;
use crate::error::ChatError;
use crate::models::chat::ChatMessage;
use self::ollama::OllamaClient;

/// Lazy, finite, single-pass sequence of response fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig
    ) -> Result<CompletionResponse, ChatError>;

    /// Clients without native streaming hand back the full reply as one fragment.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        config: &ModelConfig
    ) -> Result<TextStream, ChatError> {
        let response = self.complete(messages, config).await?;
        Ok(full_response_as_stream(move || async move { Ok(response.response) }))
    }

    async fn list_models(&self) -> Result<Vec<String>, ChatError>;

    fn get_base_url(&self) -> String;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> TextStream
where
    F: FnOnce(mpsc::Sender<Result<String, ChatError>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn full_response_as_stream<F, Fut>(response_fn: F) -> TextStream
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<String, ChatError>> + Send + 'static,
{
    create_streaming_response(move |tx| async move {
        let _ = tx.send(response_fn().await).await;
    })
}

/// Drains a stream into one string, handing each fragment to `on_fragment`
/// as it arrives. Stops at the first error.
pub async fn drain_stream<F>(mut stream: TextStream, mut on_fragment: F) -> Result<String, ChatError>
    where F: FnMut(&str) + Send
{
    let mut full = String::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        on_fragment(&fragment);
        full.push_str(&fragment);
    }
    Ok(full)
}

pub fn new_client(base_url: &str) -> Result<Arc<dyn ChatClient>, ChatError> {
    let url = Url::parse(base_url).map_err(|e|
        ChatError::validation(format!("Invalid model server URL '{}': {}", base_url, e))
    )?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(
            ChatError::validation(
                format!("Model server URL must use http or https, got '{}'", url.scheme())
            )
        );
    }
    Ok(Arc::new(OllamaClient::new(url)?))
}
