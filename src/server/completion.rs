//! `POST /api/completion`: forwards one prompt to the generation service and
//! relays its text deltas as an unbuffered `text/plain` body.
//!
//! Headers are held back until the first non-empty delta (or a clean end)
//! arrives, so failures while establishing the call still get a JSON 500.
//! Once the body has started, a failure aborts it instead.

use axum::{
    body::{ Body, Bytes },
    extract::State,
    http::{ header::CONTENT_TYPE, StatusCode },
    response::{ IntoResponse, Response },
    Json,
};
use futures::{ stream, Stream, StreamExt };
use log::{ debug, error, info, warn };
use std::time::Duration;
use tokio::time::{ timeout_at, Instant };

use super::api::AppState;
use crate::cli::Args;
use crate::llm::chat::{ ChatClient, GenerationRequest, LlmError, TokenStream };
use crate::models::completion::{ CompletionRequest, ErrorBody };

pub const PROMPT_REQUIRED: &str = "Prompt is required";
pub const GENERATION_FAILED: &str = "Failed to generate text";
pub const INVALID_BODY: &str = "Invalid request body";

/// Server-side defaults applied to every completion request.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub default_model: String,
    pub system_message: String,
    pub max_tokens: u32,
    pub max_duration: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4-turbo".to_string(),
            system_message: "You are a helpful assistant.".to_string(),
            max_tokens: 150,
            max_duration: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            default_model: args.default_model.clone(),
            system_message: args.system_message.clone(),
            max_tokens: args.max_tokens,
            max_duration: Duration::from_secs(args.max_duration_secs),
        }
    }

    /// Request fields win over configured defaults when present and non-blank.
    pub fn resolve(&self, request: &CompletionRequest, prompt: &str) -> GenerationRequest {
        let pick = |value: &Option<String>, fallback: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        GenerationRequest {
            model: pick(&request.model, &self.default_model),
            system_message: pick(&request.system_message, &self.system_message),
            prompt: prompt.to_string(),
            max_tokens: self.max_tokens,
        }
    }
}

fn json_error(status: StatusCode, body: ErrorBody) -> Response {
    (status, Json(body)).into_response()
}

pub async fn completion_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CompletionRequest::default()
    } else {
        match serde_json::from_slice::<CompletionRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting undecodable completion request: {}", e);
                return json_error(
                    StatusCode::BAD_REQUEST,
                    ErrorBody::with_details(INVALID_BODY, e.to_string())
                );
            }
        }
    };

    let Some(prompt) = request.prompt_text() else {
        warn!("Rejecting completion request without prompt");
        return json_error(StatusCode::BAD_REQUEST, ErrorBody::new(PROMPT_REQUIRED));
    };

    let generation = state.relay.resolve(&request, prompt);
    info!("Received prompt ({} chars) for model {}", prompt.chars().count(), generation.model);
    debug!("Prompt: {}", prompt);

    let limit = state.relay.max_duration;
    let deadline = Instant::now() + limit;

    match open_relay(state.chat.as_ref(), generation, deadline, limit).await {
        Ok(body_stream) => {
            info!("Stream generation initiated successfully");
            ([(CONTENT_TYPE, "text/plain; charset=utf-8")], Body::from_stream(body_stream)).into_response()
        }
        Err(e) => {
            error!("Completion failed before streaming: {}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::with_details(GENERATION_FAILED, e.to_string())
            )
        }
    }
}

/// Opens the upstream call and waits for its first payload. Everything after
/// that is relayed lazily by the returned stream.
async fn open_relay(
    client: &dyn ChatClient,
    request: GenerationRequest,
    deadline: Instant,
    limit: Duration
) -> Result<impl Stream<Item = Result<Bytes, LlmError>> + Send + 'static, LlmError> {
    let mut upstream = timeout_at(deadline, client.stream_chat(request)).await.map_err(|_|
        LlmError::Timeout(limit)
    )??;

    let first = match
        timeout_at(deadline, next_delta(&mut upstream)).await.map_err(|_| LlmError::Timeout(limit))?
    {
        Some(item) => Some(item?),
        None => None,
    };

    let head = stream::iter(first.map(|text| Ok(Bytes::from(text))));
    Ok(head.chain(relay_chunks(upstream, deadline, limit)))
}

/// Next non-empty delta; empty ones carry no payload.
async fn next_delta(upstream: &mut TokenStream) -> Option<Result<String, LlmError>> {
    while let Some(item) = upstream.next().await {
        match item {
            Ok(text) if text.is_empty() => {
                continue;
            }
            other => {
                return Some(other);
            }
        }
    }
    None
}

fn relay_chunks(
    upstream: TokenStream,
    deadline: Instant,
    limit: Duration
) -> impl Stream<Item = Result<Bytes, LlmError>> + Send + 'static {
    stream::unfold(Some(upstream), move |state| async move {
        let mut upstream = state?;
        match timeout_at(deadline, next_delta(&mut upstream)).await {
            Ok(Some(Ok(text))) => Some((Ok(Bytes::from(text)), Some(upstream))),
            Ok(Some(Err(e))) => {
                error!("Generation stream failed mid-response: {}", e);
                Some((Err(e), None))
            }
            Ok(None) => {
                debug!("Generation stream finished");
                None
            }
            Err(_) => {
                error!("Generation exceeded {:?}; aborting response", limit);
                Some((Err(LlmError::Timeout(limit)), None))
            }
        }
    })
}
