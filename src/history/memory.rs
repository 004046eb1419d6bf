use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ validate_title, HistoryStore, StoreError };
use crate::models::chat::{ ChatRecord, MessageRecord, Role };

#[derive(Default)]
struct Tables {
    chats: Vec<ChatRecord>,
    messages: Vec<MessageRecord>,
}

/// Process-local store; contents vanish when the server stops.
#[derive(Default)]
pub struct MemoryHistoryStore {
    tables: RwLock<Tables>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_chat(&self, title: &str) -> Result<ChatRecord, StoreError> {
        let chat = ChatRecord {
            id: Uuid::new_v4().to_string(),
            title: validate_title(title)?.to_string(),
            created_at: Utc::now(),
        };
        self.tables.write().await.chats.push(chat.clone());
        Ok(chat)
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let tables = self.tables.read().await;
        // Insertion order breaks timestamp ties.
        Ok(tables.chats.iter().rev().cloned().collect())
    }

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(
            tables.messages
                .iter()
                .filter(|m| m.chat_id == chat_id)
                .cloned()
                .collect()
        )
    }

    async fn add_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str
    ) -> Result<MessageRecord, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.chats.iter().any(|c| c.id == chat_id) {
            return Err(StoreError::NotFound(chat_id.to_string()));
        }
        let message = MessageRecord {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<ChatRecord, StoreError> {
        let title = validate_title(title)?;
        let mut tables = self.tables.write().await;
        let chat = tables.chats
            .iter_mut()
            .find(|c| c.id == chat_id)
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        chat.title = title.to_string();
        Ok(chat.clone())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.chats.len();
        tables.chats.retain(|c| c.id != chat_id);
        if tables.chats.len() == before {
            return Err(StoreError::NotFound(chat_id.to_string()));
        }
        tables.messages.retain(|m| m.chat_id != chat_id);
        Ok(())
    }
}
