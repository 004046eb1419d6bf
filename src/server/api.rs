use crate::history::{ HistoryStore, StoreError, DEFAULT_CHAT_TITLE };
use crate::llm::available_models;
use crate::llm::chat::ChatClient;
use crate::models::chat::{ ChatRecord, MessageRecord, NewChat, NewMessage, TitleUpdate };
use crate::models::completion::{ ErrorBody, ModelEntry, ModelsResponse };
use super::completion::{ completion_handler, RelayConfig };
use std::sync::Arc;
use axum::{
    body::Bytes,
    routing::{ get, patch, post },
    Router,
    extract::{ Path, State },
    response::{ Html, IntoResponse, Response },
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;
use tower_http::cors::{ Any, CorsLayer };
use log::{ error, info };

const INDEX_HTML: &str = include_str!("static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<dyn ChatClient>,
    pub history: Arc<dyn HistoryStore>,
    pub relay: RelayConfig,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(details) =>
                (StatusCode::BAD_REQUEST, ErrorBody::with_details("Invalid request body", details)),
            ApiError::Store(StoreError::NotFound(id)) =>
                (StatusCode::NOT_FOUND, ErrorBody::with_details("Chat not found", id)),
            ApiError::Store(StoreError::InvalidInput(details)) =>
                (StatusCode::BAD_REQUEST, ErrorBody::with_details("Invalid input", details)),
            ApiError::Store(StoreError::Backend(details)) => {
                error!("History backend error: {}", details);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::with_details("History store failed", details))
            }
        };
        (status, Json(body)).into_response()
    }
}

fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_required(body)
}

fn parse_required<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/completion", post(completion_handler))
        .route("/api/models", get(models_handler))
        .route("/api/chats", get(list_chats_handler).post(create_chat_handler))
        .route("/api/chats/{id}", patch(rename_chat_handler).delete(delete_chat_handler))
        .route("/api/chats/{id}/messages", get(chat_messages_handler).post(add_message_handler))
        .layer(cors)
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn models_handler(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = available_models()
        .iter()
        .map(|m| ModelEntry { id: m.id.to_string(), label: m.label.to_string() })
        .collect();
    Json(ModelsResponse { models, default: state.relay.default_model.clone() })
}

async fn list_chats_handler(
    State(state): State<AppState>
) -> Result<Json<Vec<ChatRecord>>, ApiError> {
    Ok(Json(state.history.list_chats().await?))
}

async fn create_chat_handler(
    State(state): State<AppState>,
    body: Bytes
) -> Result<(StatusCode, Json<ChatRecord>), ApiError> {
    let req: NewChat = parse_body(&body)?;
    let title = req.title.as_deref().unwrap_or(DEFAULT_CHAT_TITLE);
    let chat = state.history.create_chat(title).await?;
    info!("Created chat {}", chat.id);
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn chat_messages_handler(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    Ok(Json(state.history.get_chat_messages(&id).await?))
}

async fn add_message_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes
) -> Result<(StatusCode, Json<MessageRecord>), ApiError> {
    let req: NewMessage = parse_required(&body)?;
    let message = state.history.add_message(&id, req.role, &req.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn rename_chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes
) -> Result<Json<ChatRecord>, ApiError> {
    let req: TitleUpdate = parse_required(&body)?;
    Ok(Json(state.history.update_chat_title(&id, &req.title).await?))
}

async fn delete_chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<StatusCode, ApiError> {
    state.history.delete_chat(&id).await?;
    info!("Deleted chat {}", id);
    Ok(StatusCode::NO_CONTENT)
}
