//! Client-side conversation state for one chat front end.
//!
//! A [`ChatSession`] owns the ordered message list, the loading flag, the last
//! error and the selected model. Every change goes through one of its
//! transition methods so the "one open assistant message" rule holds no matter
//! who drives it.

pub mod client;
mod decoder;

use log::debug;

use crate::models::chat::{ ChatMessage, Role };
use crate::models::completion::{ CompletionRequest, ErrorBody };
use self::decoder::Utf8StreamDecoder;

pub use self::client::{ drive_stream, ClientError, RelayClient, SubmitOutcome };

pub const GENERIC_FAILURE: &str = "Failed to fetch response";

#[derive(Debug, Clone)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    is_loading: bool,
    error: Option<String>,
    selected_model: String,
    system_message: String,
    buffer: String,
    decoder: Utf8StreamDecoder,
    streaming: bool,
}

impl ChatSession {
    pub fn new(model: impl Into<String>, system_message: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            is_loading: false,
            error: None,
            selected_model: model.into(),
            system_message: system_message.into(),
            buffer: String::new(),
            decoder: Utf8StreamDecoder::default(),
            streaming: false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    /// Applies to every request submitted after the call.
    pub fn select_model(&mut self, model: impl Into<String>) {
        self.selected_model = model.into();
    }

    /// Starts an exchange. Returns `None` without touching any state when the
    /// prompt is blank or a response is still in flight.
    pub fn submit(&mut self, prompt: &str) -> Option<CompletionRequest> {
        if self.is_loading || prompt.trim().is_empty() {
            return None;
        }

        self.is_loading = true;
        self.error = None;
        self.messages.push(ChatMessage::user(prompt));

        Some(CompletionRequest {
            prompt: Some(prompt.to_string()),
            system_message: Some(self.system_message.clone()),
            model: Some(self.selected_model.clone()),
        })
    }

    /// Records a non-success response. The user message stays in history.
    pub fn reject(&mut self, status: u16, body: &[u8]) {
        let message = serde_json
            ::from_slice::<ErrorBody>(body)
            .map(|payload| payload.message().to_string())
            .unwrap_or_else(|_| GENERIC_FAILURE.to_string());
        debug!("Relay rejected request with {}: {}", status, message);
        self.fail(message);
    }

    /// Opens an empty assistant message for the incoming stream.
    pub fn begin_response(&mut self) {
        if self.streaming {
            return;
        }
        self.streaming = true;
        self.buffer.clear();
        self.decoder = Utf8StreamDecoder::default();
        self.messages.push(ChatMessage::assistant(String::new()));
    }

    /// Appends one body chunk and returns the newly decoded text.
    pub fn push_chunk(&mut self, bytes: &[u8]) -> String {
        if !self.streaming {
            return String::new();
        }
        let delta = self.decoder.decode(bytes);
        self.append(&delta);
        delta
    }

    /// Closes the stream normally.
    pub fn finish(&mut self) {
        let tail = self.decoder.flush();
        self.append(&tail);
        self.close();
    }

    /// Ends the exchange with an error; streamed content so far is kept.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.streaming {
            let tail = self.decoder.flush();
            self.append(&tail);
        }
        self.error = Some(message.into());
        self.close();
    }

    /// Starts a fresh conversation, keeping the selected model.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.error = None;
        self.close();
    }

    /// Replaces the conversation with previously persisted messages.
    pub fn load(&mut self, messages: Vec<ChatMessage>) {
        self.reset();
        self.messages = messages;
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);
        if let Some(last) = self.messages.last_mut() {
            if last.role == Role::Assistant {
                last.content.clone_from(&self.buffer);
            }
        }
    }

    fn close(&mut self) {
        self.streaming = false;
        self.is_loading = false;
        self.buffer.clear();
    }
}
