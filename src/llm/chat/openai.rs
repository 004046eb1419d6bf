use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, error };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use std::time::Duration;
use tokio::sync::mpsc;

use super::sse::{ SseDecoder, SseEvent };
use super::{ create_streaming_response, ChatClient, GenerationRequest, LlmError, TokenStream };
use crate::llm::{ LlmConfig, LlmType };

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for any provider speaking the OpenAI chat-completions protocol.
pub struct OpenAIChatClient {
    http: HttpClient,
    api_key: Option<String>,
    base_url: String,
    llm_type: LlmType,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

impl OpenAIChatClient {
    pub fn new(
        llm_type: LlmType,
        api_key: Option<String>,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_url = base_url.unwrap_or_else(|| llm_type.default_base_url().to_string());
        reqwest::Url::parse(&api_url).map_err(|e|
            LlmError::Config(format!("invalid base URL '{}': {}", api_url, e))
        )?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url: api_url,
            llm_type,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
        if api_key.is_none() && config.llm_type.requires_api_key() {
            return Err(LlmError::MissingApiKey(format!("{:?}", config.llm_type)));
        }

        Self::new(config.llm_type, api_key, config.base_url.clone(), config.request_timeout)
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

/// Pulls the human-readable message out of an upstream error body, if it has one.
fn upstream_error_message(body: &str) -> String {
    serde_json
        ::from_str::<OpenAIErrorEnvelope>(body)
        .map(|env| env.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Returns `false` once the stream should stop: terminal event or receiver gone.
async fn forward(tx: &mpsc::Sender<Result<String, LlmError>>, event: SseEvent) -> bool {
    match event {
        SseEvent::Delta(content) => tx.send(Ok(content)).await.is_ok(),
        SseEvent::Error(message) => {
            error!("Generation service reported a stream error: {}", message);
            let _ = tx.send(Err(LlmError::Stream(message))).await;
            false
        }
        SseEvent::Done => false,
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(&self, request: GenerationRequest) -> Result<TokenStream, LlmError> {
        let url = self.completions_url();
        let body = OpenAIChatRequest {
            model: request.model,
            messages: vec![
                OpenAIMessage { role: "system".to_string(), content: request.system_message },
                OpenAIMessage { role: "user".to_string(), content: request.prompt }
            ],
            max_tokens: request.max_tokens,
            stream: true,
        };

        let mut req = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(&text),
            });
        }
        debug!("Generation stream opened against {}", url);

        Ok(
            create_streaming_response(move |tx| async move {
                let mut bytes = resp.bytes_stream();
                let mut decoder = SseDecoder::default();

                loop {
                    // A dropped receiver ends the task, which drops the response
                    // and closes the upstream connection.
                    let next = tokio::select! {
                        _ = tx.closed() => {
                            debug!("Relay went away; cancelling generation call to {}", url);
                            return;
                        }
                        next = bytes.next() => next,
                    };
                    let Some(chunk_result) = next else {
                        break;
                    };
                    let chunk = match chunk_result {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            let _ = tx.send(Err(LlmError::Http(e))).await;
                            return;
                        }
                    };
                    for event in decoder.feed(&chunk) {
                        if !forward(&tx, event).await {
                            return;
                        }
                    }
                }

                for event in decoder.finish() {
                    if !forward(&tx, event).await {
                        return;
                    }
                }
            })
        )
    }

    fn provider(&self) -> LlmType {
        self.llm_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_appends_route_once() {
        let config = LlmConfig {
            llm_type: LlmType::Ollama,
            base_url: Some("http://localhost:11434/v1/".into()),
            ..LlmConfig::default()
        };
        let client = OpenAIChatClient::from_config(&config).unwrap();
        assert_eq!(client.completions_url(), "http://localhost:11434/v1/chat/completions");

        let explicit = LlmConfig {
            llm_type: LlmType::Ollama,
            base_url: Some("http://proxy/chat/completions".into()),
            ..LlmConfig::default()
        };
        let client = OpenAIChatClient::from_config(&explicit).unwrap();
        assert_eq!(client.completions_url(), "http://proxy/chat/completions");
    }

    #[test]
    fn malformed_base_url_is_a_config_error() {
        let config = LlmConfig {
            llm_type: LlmType::Ollama,
            base_url: Some("api.example.com/v1".into()),
            ..LlmConfig::default()
        };
        assert!(matches!(OpenAIChatClient::from_config(&config), Err(LlmError::Config(_))));
    }

    #[test]
    fn extracts_upstream_error_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(upstream_error_message(body), "Incorrect API key provided");
        assert_eq!(upstream_error_message(" Bad Gateway "), "Bad Gateway");
    }

    #[test]
    fn request_body_carries_system_and_user_messages() {
        let body = OpenAIChatRequest {
            model: "gpt-4-turbo".into(),
            messages: vec![
                OpenAIMessage { role: "system".into(), content: "sys".into() },
                OpenAIMessage { role: "user".into(), content: "hi".into() }
            ],
            max_tokens: 150,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 150);
        assert_eq!(json["stream"], true);
    }
}
