#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{ to_bytes, Body };
use axum::http::{ Request, StatusCode };
use axum::Router;
use chat_relay::history::{ HistoryStore, MemoryHistoryStore };
use chat_relay::llm::chat::{ create_streaming_response, ChatClient, GenerationRequest, LlmError, TokenStream };
use chat_relay::llm::LlmType;
use chat_relay::server::api::{ router, AppState };
use chat_relay::server::completion::RelayConfig;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tower::ServiceExt;

#[derive(Clone, Debug)]
pub enum Step {
    Delta(&'static str),
    Fail(&'static str),
    Pause(Duration),
}

/// Generation service double that replays a fixed script and records every call.
pub struct ScriptedClient {
    script: Vec<Step>,
    open_error: Option<&'static str>,
    calls: AtomicUsize,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script,
            open_error: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn deltas(parts: &[&'static str]) -> Arc<Self> {
        Self::new(parts.iter().map(|p| Step::Delta(*p)).collect())
    }

    pub fn failing_to_open(message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            script: Vec::new(),
            open_error: Some(message),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn stream_chat(&self, request: GenerationRequest) -> Result<TokenStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request);

        if let Some(message) = self.open_error {
            return Err(LlmError::Upstream { status: 401, message: message.to_string() });
        }

        let script = self.script.clone();
        Ok(
            create_streaming_response(move |tx| async move {
                for step in script {
                    let item = match step {
                        Step::Pause(d) => {
                            tokio::time::sleep(d).await;
                            continue;
                        }
                        Step::Delta(text) => Ok(text.to_string()),
                        Step::Fail(message) => Err(LlmError::Stream(message.to_string())),
                    };
                    let stop = item.is_err();
                    if tx.send(item).await.is_err() || stop {
                        return;
                    }
                }
            })
        )
    }

    fn provider(&self) -> LlmType {
        LlmType::OpenAI
    }
}

pub fn state_with(chat: Arc<ScriptedClient>, relay: RelayConfig) -> AppState {
    let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
    AppState { chat, history, relay }
}

/// Router backed by an arbitrary generation client.
pub fn router_for(chat: Arc<dyn ChatClient>, relay: RelayConfig) -> Router {
    let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
    router(AppState { chat, history, relay })
}

pub fn app(chat: Arc<ScriptedClient>) -> Router {
    router(state_with(chat, RelayConfig::default()))
}

pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: &str
) -> axum::response::Response {
    app.oneshot(
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build should succeed")
    ).await.expect("app should handle request")
}

/// Returns `(status, body_text)`.
pub async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
    let resp = send(app, method, uri, body).await;
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body should be readable");
    (status, String::from_utf8(bytes.to_vec()).expect("body should be utf-8"))
}
