use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::services::Summarize;

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_PROMPT: &str = r#"You are a news editor. Summarize the article in 2-3 short sentences.
Keep only the key facts. Answer in the language of the article.
Do not add a title or any introduction."#;

/// Hard upper bound for a single summarization call.
pub const SUMMARY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

struct OpenAiClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    prompt: String,
}

/// Summaries through an OpenAI-compatible chat completion API.
///
/// Without an API key the summarizer is disabled and every call fails with
/// [`AppError::SummarizerDisabled`]. Calls through one instance never
/// overlap.
pub struct Summarizer {
    backend: Option<OpenAiClient>,
    timeout: Duration,
    gate: Mutex<()>,
}

impl Summarizer {
    pub fn with_api_url(
        api_key: Option<String>,
        model: String,
        prompt: String,
        api_url: String,
    ) -> Result<Self> {
        let backend = match api_key.filter(|key| !key.trim().is_empty()) {
            Some(api_key) => Some(OpenAiClient {
                client: Client::builder().build()?,
                api_key,
                api_url: api_url.trim_end_matches('/').to_string(),
                model,
                prompt,
            }),
            None => None,
        };

        Ok(Self {
            backend,
            timeout: SUMMARY_TIMEOUT,
            gate: Mutex::new(()),
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: None,
            timeout: SUMMARY_TIMEOUT,
            gate: Mutex::new(()),
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn generate_summary(&self, text: &str) -> Result<String> {
        let _guard = self.gate.lock().await;

        let backend = self.backend.as_ref().ok_or(AppError::SummarizerDisabled)?;

        let raw = tokio::time::timeout(self.timeout, backend.complete(text))
            .await
            .map_err(|_| AppError::SummaryTimeout)??;

        Ok(trim_incomplete_sentence(&raw))
    }
}

impl OpenAiClient {
    async fn complete(&self, text: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.prompt.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            max_tokens: 1024,
            temperature: 1.0,
            top_p: 1.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::OpenAiApi(format!("{}: {}", status, error_text)));
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(AppError::EmptyResponse)
    }
}

#[async_trait]
impl Summarize for Summarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.generate_summary(text).await
    }
}

/// Trims the text and drops a trailing sentence that was cut off
/// mid-way. Text without any full stop is returned as is.
pub fn trim_incomplete_sentence(raw: &str) -> String {
    let trimmed = raw.trim();

    if trimmed.ends_with('.') {
        return trimmed.to_string();
    }

    match trimmed.rfind('.') {
        Some(end) => trimmed[..=end].to_string(),
        None => trimmed.to_string(),
    }
}
