pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    OpenAI,
    Groq,
    XAI,
    DeepSeek,
    Ollama,
}

impl LlmType {
    /// Base URL of the provider's OpenAI-compatible API.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmType::OpenAI => "https://api.openai.com/v1",
            LlmType::Groq => "https://api.groq.com/openai/v1",
            LlmType::XAI => "https://api.x.ai/v1",
            LlmType::DeepSeek => "https://api.deepseek.com/v1",
            LlmType::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmType::Ollama)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}
impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LlmType::OpenAI),
            "groq" => Ok(LlmType::Groq),
            "xai" => Ok(LlmType::XAI),
            "deepseek" => Ok(LlmType::DeepSeek),
            "ollama" => Ok(LlmType::Ollama),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Ceiling on a whole generation call, body included.
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::OpenAI,
            api_key: None,
            base_url: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// An entry of the model picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOption {
    pub id: &'static str,
    pub label: &'static str,
}

const MODEL_CATALOG: &[ModelOption] = &[
    ModelOption { id: "gpt-4-turbo", label: "GPT-4 Turbo" },
    ModelOption { id: "gpt-4o", label: "GPT-4o" },
    ModelOption { id: "gpt-4o-mini", label: "GPT-4o mini" },
    ModelOption { id: "gpt-3.5-turbo", label: "GPT-3.5" },
];

pub fn available_models() -> &'static [ModelOption] {
    MODEL_CATALOG
}
