use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Seconds the server may hold a `getUpdates` request open.
pub const LONG_POLL_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    MarkdownV2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
}

impl OutgoingMessage {
    pub fn plain(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
        }
    }

    pub fn markdown(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: Some(ParseMode::MarkdownV2),
        }
    }
}

/// Anything that can deliver a message to a chat.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub user: User,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatIdRequest {
    chat_id: i64,
}

/// Minimal Telegram Bot API client.
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn with_api_url(token: &str, api_url: &str) -> Result<Self> {
        let client = Client::builder()
            // Must outlive the long-poll window of getUpdates.
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 30))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let api_response: ApiResponse<T> = response.json().await?;

        if !api_response.ok {
            return Err(AppError::TelegramApi(format!(
                "{} failed ({}): {}",
                method,
                status,
                api_response.description.unwrap_or_default()
            )));
        }

        api_response
            .result
            .ok_or_else(|| AppError::TelegramApi(format!("{} returned no result", method)))
    }

    pub async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        let _: serde_json::Value = self.call("sendMessage", message).await?;
        Ok(())
    }

    /// Long-polls for updates with ids at or above `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: LONG_POLL_TIMEOUT_SECS,
            allowed_updates: vec!["message".to_string()],
        };
        self.call("getUpdates", &request).await
    }

    pub async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatMember>> {
        self.call("getChatAdministrators", &ChatIdRequest { chat_id })
            .await
    }
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.send_message(&message).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn send_posts_markdown_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_json(serde_json::json!({
                "chat_id": -100,
                "text": "*hi*",
                "parse_mode": "MarkdownV2"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": { "message_id": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TelegramClient::with_api_url("TOKEN", &server.uri()).unwrap();
        tokio_test::assert_ok!(client.send(OutgoingMessage::markdown(-100, "*hi*")).await);
    }

    #[tokio::test]
    async fn api_failure_carries_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::with_api_url("TOKEN", &server.uri()).unwrap();
        let err = client
            .send(OutgoingMessage::plain(1, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TelegramApi(ref msg) if msg.contains("chat not found")));
    }

    #[tokio::test]
    async fn updates_are_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": [
                    {
                        "update_id": 10,
                        "message": {
                            "message_id": 5,
                            "from": { "id": 42, "is_bot": false, "first_name": "Ann" },
                            "chat": { "id": 42, "type": "private" },
                            "text": "/listsources"
                        }
                    },
                    { "update_id": 11 }
                ]
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::with_api_url("TOKEN", &server.uri()).unwrap();
        let updates = client.get_updates(0).await.unwrap();

        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.text.as_deref(), Some("/listsources"));
        assert_eq!(message.from.as_ref().unwrap().id, 42);
        assert!(updates[1].message.is_none());
    }
}
