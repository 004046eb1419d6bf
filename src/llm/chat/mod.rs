pub mod openai;
pub mod sse;

use async_trait::async_trait;
use futures::{ Future, Stream };
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use super::{ LlmConfig, LlmType };
use self::openai::OpenAIChatClient;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0} API key is required")]
    MissingApiKey(String),

    #[error("Invalid LLM configuration: {0}")]
    Config(String),

    #[error("Request to generation service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation service returned {status}: {message}")]
    Upstream {
        status: u16,
        message: String,
    },

    #[error("Generation stream failed: {0}")]
    Stream(String),

    #[error("Generation did not finish within {0:?}")]
    Timeout(Duration),
}

/// One streaming generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_message: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Opens a streaming call. Failures while establishing the call are returned
    /// as `Err`; failures after that arrive as items of the stream.
    async fn stream_chat(&self, request: GenerationRequest) -> Result<TokenStream, LlmError>;

    fn provider(&self) -> LlmType;
}

/// Runs `response_fn` on its own task, handing it the sending half of the
/// stream. The task stops producing once the returned stream is dropped.
pub fn create_streaming_response<F, Fut>(response_fn: F) -> TokenStream
where
    F: FnOnce(mpsc::Sender<Result<String, LlmError>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client: Arc<dyn ChatClient> = Arc::new(OpenAIChatClient::from_config(config)?);
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn streaming_response_preserves_send_order() {
        let mut stream = create_streaming_response(|tx| async move {
            for piece in ["a", "b", "c"] {
                if tx.send(Ok(piece.to_string())).await.is_err() {
                    return;
                }
            }
        });

        let mut collected = String::new();
        while let Some(item) = stream.next().await {
            collected.push_str(&item.unwrap());
        }
        assert_eq!(collected, "abc");
    }

    #[test]
    fn new_client_requires_key_for_hosted_providers() {
        let config = LlmConfig { llm_type: LlmType::OpenAI, ..LlmConfig::default() };
        assert!(matches!(new_client(&config), Err(LlmError::MissingApiKey(_))));

        let local = LlmConfig { llm_type: LlmType::Ollama, ..LlmConfig::default() };
        assert!(new_client(&local).is_ok());
    }
}
