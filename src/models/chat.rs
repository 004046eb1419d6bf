use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a conversation as the session holds it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Row of the `chats` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Row of the `messages` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRecord> for ChatMessage {
    fn from(record: MessageRecord) -> Self {
        Self { role: record.role, content: record.content }
    }
}

/// Body of `POST /api/chats`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewChat {
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of `POST /api/chats/{id}/messages`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
}

/// Body of `PATCH /api/chats/{id}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TitleUpdate {
    pub title: String,
}
