mod memory;
mod redis;
mod supabase;
use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ ChatRecord, MessageRecord, Role };

pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;
pub use self::supabase::SupabaseHistoryStore;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Chat not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("History backend error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(format!("Malformed stored record: {}", e))
    }
}

/// Durable chat storage. Chats are listed newest first, messages oldest first.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_chat(&self, title: &str) -> Result<ChatRecord, StoreError>;

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StoreError>;

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>, StoreError>;

    async fn add_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str
    ) -> Result<MessageRecord, StoreError>;

    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<ChatRecord, StoreError>;

    /// Removes the chat together with its messages.
    async fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError>;
}

pub(crate) fn validate_title(title: &str) -> Result<&str, StoreError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidInput("Chat title must not be empty".into()));
    }
    Ok(trimmed)
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryHistoryStore::new())),
        "redis" => {
            let store = RedisHistoryStore::new(&args.history_host, &args.history_redis_prefix)?;
            Ok(Arc::new(store))
        }
        "supabase" => {
            let url = args.supabase_url
                .clone()
                .ok_or("SUPABASE_URL is required for the supabase history store")?;
            let key = args.supabase_anon_key
                .clone()
                .ok_or("SUPABASE_ANON_KEY is required for the supabase history store")?;
            Ok(Arc::new(SupabaseHistoryStore::new(&url, &key)?))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "redis" => info!("Chat history will be stored in redis at {}", args.history_host),
        "supabase" =>
            info!(
                "Chat history will be stored in supabase at {}",
                args.supabase_url.as_deref().unwrap_or("<unset>")
            ),
        other => info!("Chat history will be stored in: {}", other),
    }
    create_history_store(args)
}
