//! AI collaborator boundary
//!
//! Rooms flagged as AI rooms forward posted messages to an external
//! completion backend and append its asynchronous reply. The coordinator
//! invokes the backend off its own task with a bounded timeout; a slow or
//! unavailable backend degrades to an in-room notice and never stalls the
//! room for other members.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::room::ChatMessage;

/// How many trailing messages of room history accompany a prompt.
const HISTORY_WINDOW: usize = 10;

/// Name AI replies and error notices are attributed to.
pub const AI_AUTHOR: &str = "AI Bot";

/// Asynchronous "ask and later receive an answer or an error" capability.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn complete(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, AppError>;
}

/// Build the context block sent to the backend: a trailing window of the
/// conversation followed by the new prompt.
pub fn build_context(prompt: &str, history: &[ChatMessage]) -> String {
    let mut context = String::new();
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    for msg in &history[start..] {
        context.push_str(&format!("{}: {}\n", msg.author, msg.content));
    }
    context.push_str(&format!("user: {}\nassistant:", prompt));
    context
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP backend speaking the Ollama `/api/generate` shape.
pub struct HttpAiBackend {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpAiBackend {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl AiBackend for HttpAiBackend {
    async fn complete(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, AppError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: build_context(prompt, history),
            stream: false,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::AiUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::AiUnavailable(format!(
                "backend returned {}",
                response.status()
            )));
        }
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::AiUnavailable(e.to_string()))?;
        Ok(body.response.trim().to_string())
    }
}

/// Test backend echoing the prompt back.
#[cfg(test)]
pub struct EchoBackend;

#[cfg(test)]
#[async_trait]
impl AiBackend for EchoBackend {
    async fn complete(&self, prompt: &str, _history: &[ChatMessage]) -> Result<String, AppError> {
        Ok(format!("echo: {prompt}"))
    }
}

/// Test backend reporting how many prior messages it was given.
#[cfg(test)]
pub struct CountingBackend;

#[cfg(test)]
#[async_trait]
impl AiBackend for CountingBackend {
    async fn complete(&self, _prompt: &str, history: &[ChatMessage]) -> Result<String, AppError> {
        Ok(format!("history {}", history.len()))
    }
}
