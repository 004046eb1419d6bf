use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, RequestBuilder, Response, header::{ HeaderMap, HeaderValue } };
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{ validate_title, HistoryStore, StoreError };
use crate::models::chat::{ ChatRecord, MessageRecord, Role };

/// Hosted Postgres reached through its PostgREST interface.
pub struct SupabaseHistoryStore {
    http: HttpClient,
    rest_url: String,
}

impl SupabaseHistoryStore {
    pub fn new(project_url: &str, anon_key: &str) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(anon_key).map_err(|e|
            StoreError::InvalidInput(format!("Invalid Supabase key format: {}", e))
        )?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", anon_key)).map_err(|e|
            StoreError::InvalidInput(format!("Invalid Supabase key format: {}", e))
        )?;
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{}", self.rest_url, name)
    }

    fn returning(req: RequestBuilder) -> RequestBuilder {
        req.header("Prefer", "return=representation")
    }

    async fn rows<T: DeserializeOwned>(resp: Response) -> Result<Vec<T>, StoreError> {
        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::InvalidInput(body.trim().to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("{}: {}", status, body.trim())));
        }
        Ok(resp.json::<Vec<T>>().await?)
    }

    async fn single<T: DeserializeOwned>(resp: Response, chat_id: &str) -> Result<T, StoreError> {
        Self::rows(resp).await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))
    }
}

#[async_trait]
impl HistoryStore for SupabaseHistoryStore {
    async fn create_chat(&self, title: &str) -> Result<ChatRecord, StoreError> {
        let title = validate_title(title)?;
        let resp = Self::returning(self.http.post(self.table("chats")))
            .json(&json!([{ "title": title }]))
            .send().await?;
        Self::single(resp, "<new>").await
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let resp = self.http
            .get(self.table("chats"))
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send().await?;
        Self::rows(resp).await
    }

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let filter = format!("eq.{}", chat_id);
        let resp = self.http
            .get(self.table("messages"))
            .query(&[("select", "*"), ("chat_id", filter.as_str()), ("order", "created_at.asc")])
            .send().await?;
        Self::rows(resp).await
    }

    async fn add_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str
    ) -> Result<MessageRecord, StoreError> {
        debug!("Persisting {} message ({} bytes) to chat {}", role, content.len(), chat_id);
        let resp = Self::returning(self.http.post(self.table("messages")))
            .json(&json!([{ "chat_id": chat_id, "role": role, "content": content }]))
            .send().await?;
        // The foreign key rejects unknown chats with 409.
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Err(StoreError::NotFound(chat_id.to_string()));
        }
        Self::single(resp, chat_id).await
    }

    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<ChatRecord, StoreError> {
        let title = validate_title(title)?;
        let filter = format!("eq.{}", chat_id);
        let resp = Self::returning(self.http.patch(self.table("chats")))
            .query(&[("id", filter.as_str())])
            .json(&json!({ "title": title }))
            .send().await?;
        Self::single(resp, chat_id).await
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        let filter = format!("eq.{}", chat_id);
        let resp = Self::returning(self.http.delete(self.table("chats")))
            .query(&[("id", filter.as_str())])
            .send().await?;
        let _: ChatRecord = Self::single(resp, chat_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_url_is_derived_from_project_url() {
        let store = SupabaseHistoryStore::new("https://demo.supabase.co/", "anon").unwrap();
        assert_eq!(store.table("chats"), "https://demo.supabase.co/rest/v1/chats");
    }

    #[test]
    fn rejects_keys_that_are_not_header_safe() {
        assert!(SupabaseHistoryStore::new("https://demo.supabase.co", "bad\nkey").is_err());
    }
}
