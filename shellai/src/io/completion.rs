//! Completion collaborator: prompt plus history in, raw reply text out.
//!
//! The [`Completion`] trait is the seam between the engine and the language
//! model backend. [`HttpCompletion`] talks to an OpenAI-compatible
//! chat-completions endpoint; tests use scripted completions instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::action::HistoryEntry;
use crate::io::config::AgentConfig;

/// Failures talking to the completion backend.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("no API key configured (set OPENAI_API_KEY or `shellai config set api_key ...`)")]
    MissingApiKey,

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for CompletionError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

/// Abstraction over the language model backend.
pub trait Completion {
    /// Send `prompt` after the prior turns in `history` and return the raw reply.
    fn complete(&self, prompt: &str, history: &[HistoryEntry]) -> anyhow::Result<String>;
}

/// Blocking client for an OpenAI-compatible chat-completions endpoint.
pub struct HttpCompletion {
    http: reqwest::blocking::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpCompletion {
    pub fn from_config(config: &AgentConfig) -> Result<Self, CompletionError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    #[instrument(level = "info", skip_all, fields(model = %self.model, turns = history.len()))]
    fn chat(&self, prompt: &str, history: &[HistoryEntry]) -> Result<String, CompletionError> {
        let api_key = self.api_key.as_deref().ok_or(CompletionError::MissingApiKey)?;
        let request = ChatRequest::new(&self.model, prompt, history);

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(CompletionError::Http(format!(
                "chat completions status={status} body={body}"
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        let content = parsed.into_content()?;
        debug!(bytes = content.len(), "received completion");
        Ok(content)
    }
}

impl Completion for HttpCompletion {
    fn complete(&self, prompt: &str, history: &[HistoryEntry]) -> anyhow::Result<String> {
        Ok(self.chat(prompt, history)?)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, prompt: &'a str, history: &'a [HistoryEntry]) -> Self {
        let mut messages: Vec<ChatMessage<'a>> = history
            .iter()
            .map(|entry| ChatMessage {
                role: entry.role.as_str(),
                content: &entry.content,
            })
            .collect();
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        Self {
            model,
            messages,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, CompletionError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::ResponseFormat("reply has no message content".to_string()))
    }
}
