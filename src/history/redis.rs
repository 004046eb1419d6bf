use async_trait::async_trait;
use chrono::Utc;
use log::error;
use redis::{ Client, AsyncCommands };
use uuid::Uuid;

use super::{ validate_title, HistoryStore, StoreError };
use crate::models::chat::{ ChatRecord, MessageRecord, Role };

/// Layout: `{prefix}chats` is a sorted set of chat ids scored by creation time,
/// `{prefix}chat:{id}` holds the chat row as JSON and `{prefix}messages:{id}` is
/// a list of message rows in insertion order.
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

impl RedisHistoryStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn index_key(&self) -> String {
        format!("{}chats", self.key_prefix)
    }

    fn chat_key(&self, chat_id: &str) -> String {
        format!("{}chat:{}", self.key_prefix, chat_id)
    }

    fn messages_key(&self, chat_id: &str) -> String {
        format!("{}messages:{}", self.key_prefix, chat_id)
    }

    async fn load_chat(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        chat_id: &str
    ) -> Result<ChatRecord, StoreError> {
        let raw: Option<String> = conn.get(self.chat_key(chat_id)).await?;
        let raw = raw.ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn create_chat(&self, title: &str) -> Result<ChatRecord, StoreError> {
        let mut conn = self.get_connection().await?;
        let chat = ChatRecord {
            id: Uuid::new_v4().to_string(),
            title: validate_title(title)?.to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&chat)?;
        let _: () = conn.set(self.chat_key(&chat.id), json).await?;
        let _: i64 = conn.zadd(self.index_key(), &chat.id, chat.created_at.timestamp_micros()).await?;
        Ok(chat)
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.zrevrange(self.index_key(), 0, -1).await?;
        let mut chats = Vec::with_capacity(ids.len());

        for id in &ids {
            match self.load_chat(&mut conn, id).await {
                Ok(chat) => chats.push(chat),
                Err(e) => error!("Skipping unreadable chat {}: {}", id, e),
            }
        }
        Ok(chats)
    }

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let mut conn = self.get_connection().await?;
        let entries: Vec<String> = conn.lrange(self.messages_key(chat_id), 0, -1).await?;
        let mut messages = Vec::with_capacity(entries.len());

        for entry in &entries {
            match serde_json::from_str::<MessageRecord>(entry) {
                Ok(msg) => messages.push(msg),
                Err(e) => error!("Error parsing history entry: {}", e),
            }
        }
        Ok(messages)
    }

    async fn add_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str
    ) -> Result<MessageRecord, StoreError> {
        let mut conn = self.get_connection().await?;
        let exists: bool = conn.exists(self.chat_key(chat_id)).await?;
        if !exists {
            return Err(StoreError::NotFound(chat_id.to_string()));
        }

        let message = MessageRecord {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&message)?;
        let _: i64 = conn.rpush(self.messages_key(chat_id), json).await?;
        Ok(message)
    }

    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<ChatRecord, StoreError> {
        let title = validate_title(title)?;
        let mut conn = self.get_connection().await?;
        let mut chat = self.load_chat(&mut conn, chat_id).await?;
        chat.title = title.to_string();

        let json = serde_json::to_string(&chat)?;
        let _: () = conn.set(self.chat_key(chat_id), json).await?;
        Ok(chat)
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = conn.del(vec![self.chat_key(chat_id), self.messages_key(chat_id)]).await?;
        let _: i64 = conn.zrem(self.index_key(), chat_id).await?;
        if removed == 0 {
            return Err(StoreError::NotFound(chat_id.to_string()));
        }
        Ok(())
    }
}
