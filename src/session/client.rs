use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use thiserror::Error;

use super::ChatSession;
use crate::models::chat::{ ChatRecord, MessageRecord, NewChat, NewMessage, Role };
use crate::models::completion::{ ErrorBody, ModelsResponse };

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relay returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
    },
}

/// How one call to [`RelayClient::submit`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank prompt or a response already in flight; nothing was sent.
    Ignored,
    /// The relay answered with an error status or could not be reached.
    Rejected,
    /// The body stream ended cleanly.
    Completed,
    /// The body stream broke after it started.
    Interrupted,
}

/// Reads `stream` chunk by chunk into the session's open assistant message,
/// calling `render` with each decoded delta.
pub async fn drive_stream<S, B, E>(
    session: &mut ChatSession,
    stream: S,
    mut render: impl FnMut(&str)
) -> SubmitOutcome
    where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>, E: Display
{
    let mut stream = std::pin::pin!(stream);
    session.begin_response();

    while let Some(next) = stream.next().await {
        match next {
            Ok(bytes) => {
                let delta = session.push_chunk(bytes.as_ref());
                if !delta.is_empty() {
                    render(&delta);
                }
            }
            Err(e) => {
                warn!("Response stream interrupted: {}", e);
                session.fail(e.to_string());
                return SubmitOutcome::Interrupted;
            }
        }
    }

    session.finish();
    SubmitOutcome::Completed
}

#[derive(Clone)]
pub struct RelayClient {
    http: HttpClient,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: HttpClient::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    /// Runs one exchange: submit, then either record the rejection or stream the reply.
    pub async fn submit(
        &self,
        session: &mut ChatSession,
        prompt: &str,
        render: impl FnMut(&str)
    ) -> SubmitOutcome {
        let Some(request) = session.submit(prompt) else {
            return SubmitOutcome::Ignored;
        };

        let resp = match self.http.post(self.url("/api/completion")).json(&request).send().await {
            Ok(resp) => resp,
            Err(e) => {
                session.fail(e.to_string());
                return SubmitOutcome::Rejected;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            session.reject(status.as_u16(), &body);
            return SubmitOutcome::Rejected;
        }

        debug!("Streaming reply for model {}", session.selected_model());
        drive_stream(session, resp.bytes_stream(), render).await
    }

    pub async fn list_models(&self) -> Result<ModelsResponse, ClientError> {
        let resp = self.http.get(self.url("/api/models")).send().await?;
        Self::parse(resp).await
    }

    pub async fn create_chat(&self, title: Option<&str>) -> Result<ChatRecord, ClientError> {
        let body = NewChat { title: title.map(str::to_string) };
        let resp = self.http.post(self.url("/api/chats")).json(&body).send().await?;
        Self::parse(resp).await
    }

    pub async fn add_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str
    ) -> Result<MessageRecord, ClientError> {
        let body = NewMessage { role, content: content.to_string() };
        let resp = self.http
            .post(self.url(&format!("/api/chats/{}/messages", chat_id)))
            .json(&body)
            .send().await?;
        Self::parse(resp).await
    }

    pub async fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>, ClientError> {
        let resp = self.http.get(self.url(&format!("/api/chats/{}/messages", chat_id))).send().await?;
        Self::parse(resp).await
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let body = resp.bytes().await.unwrap_or_default();
        let message = serde_json
            ::from_slice::<ErrorBody>(&body)
            .map(|payload| payload.message().to_string())
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        Err(ClientError::Status { status: status.as_u16(), message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatMessage;
    use futures::stream;

    fn session() -> ChatSession {
        ChatSession::new("gpt-4-turbo", "You are a helpful assistant.")
    }

    #[tokio::test]
    async fn renders_every_delta_in_order() {
        let mut s = session();
        s.submit("2+2?").unwrap();
        let chunks: Vec<Result<&[u8], String>> = vec![
            Ok("4".as_bytes()),
            Ok("".as_bytes()),
            Ok(", obviously".as_bytes())
        ];
        let mut rendered = Vec::new();

        let outcome = drive_stream(&mut s, stream::iter(chunks), |d| rendered.push(d.to_string())).await;

        assert_eq!(outcome, SubmitOutcome::Completed);
        assert_eq!(rendered, vec!["4", ", obviously"]);
        assert_eq!(s.messages().last().unwrap(), &ChatMessage::assistant("4, obviously"));
        assert!(!s.is_loading());
    }

    #[tokio::test]
    async fn interrupted_stream_keeps_partial_text() {
        let mut s = session();
        s.submit("greet").unwrap();
        let chunks: Vec<Result<&[u8], String>> = vec![
            Ok("Hel".as_bytes()),
            Err("connection reset".to_string())
        ];

        let outcome = drive_stream(&mut s, stream::iter(chunks), |_| {}).await;

        assert_eq!(outcome, SubmitOutcome::Interrupted);
        assert_eq!(s.messages().len(), 2);
        assert_eq!(s.messages()[1], ChatMessage::assistant("Hel"));
        assert_eq!(s.error(), Some("connection reset"));
        assert!(!s.is_loading());
    }

    #[tokio::test]
    async fn blank_prompt_never_reaches_the_network() {
        // Nothing listens on this port; a request would fail as Rejected.
        let client = RelayClient::new("http://127.0.0.1:9").unwrap();
        let mut s = session();
        assert_eq!(client.submit(&mut s, "  ", |_| {}).await, SubmitOutcome::Ignored);
        assert!(s.messages().is_empty());
    }

    #[tokio::test]
    async fn unreachable_relay_is_rejected_without_rollback() {
        let client = RelayClient::new("http://127.0.0.1:9").unwrap();
        let mut s = session();
        assert_eq!(client.submit(&mut s, "hi", |_| {}).await, SubmitOutcome::Rejected);
        assert_eq!(s.messages(), &[ChatMessage::user("hi")]);
        assert!(s.error().is_some());
        assert!(!s.is_loading());
    }
}
