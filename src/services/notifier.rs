//! Telegram side effects of the vote jobs.
//!
//! The jobs only need two things from the chat: deleting a vote message once
//! a voice is decided, and re-rendering its vote counter. `Notifier` is the
//! seam; `TelegramNotifier` implements it over the Bot API.

use crate::error::AppError;
use crate::models::voice::VoteCounts;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Outward-facing effects on the vote message of a voice.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delete a vote message.
    async fn delete_message(&self, message_id: i64) -> Result<(), AppError>;

    /// Re-render the vote counter attached to a vote message.
    async fn edit_vote_count(&self, message_id: i64, counts: VoteCounts) -> Result<(), AppError>;
}

/// Telegram Bot API client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API base URL (e.g., `https://api.telegram.org`).
    pub api_url: String,

    /// Bot token from BotFather.
    #[serde(skip_serializing)]
    pub bot_token: String,

    /// Chat holding the vote messages.
    pub chat_id: i64,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            chat_id: 0,
            timeout_secs: 30,
        }
    }
}

/// Inline keyboard attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// A single inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

#[derive(Debug, Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct EditReplyMarkupRequest {
    chat_id: i64,
    message_id: i64,
    reply_markup: InlineKeyboardMarkup,
}

/// Build the two-button vote keyboard showing the current tallies.
pub fn vote_keyboard(counts: VoteCounts) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![
            InlineKeyboardButton {
                text: format!("👍 {}", counts.accept),
                callback_data: "up".to_string(),
            },
            InlineKeyboardButton {
                text: format!("👎 {}", counts.deny),
                callback_data: "down".to_string(),
            },
        ]],
    }
}

/// Telegram Bot API client.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    /// Create a new Telegram client.
    pub fn new(config: TelegramConfig) -> Result<Self, AppError> {
        if config.bot_token.is_empty() {
            return Err(AppError::config("Bot token is empty", "TELEGRAM_BOT_TOKEN"));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the URL of a Bot API method.
    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Call a Bot API method with a JSON body.
    async fn call<B: Serialize>(&self, method: &str, body: &B) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        check_response(status, &text, method)
    }
}

/// Map a Bot API response to a result.
///
/// Benign failures count as success: deleting a message that is already
/// gone, and editing a keyboard that would not change.
fn check_response(status: StatusCode, body: &str, method: &str) -> Result<(), AppError> {
    let parsed = serde_json::from_str::<ApiResponse>(body).ok();

    if status.is_success() && parsed.as_ref().is_some_and(|r| r.ok) {
        return Ok(());
    }

    let description = parsed
        .as_ref()
        .and_then(|r| r.description.clone())
        .unwrap_or_else(|| format!("Request failed ({}): {}", status.as_u16(), body));

    let lowered = description.to_lowercase();
    if lowered.contains("message to delete not found") || lowered.contains("message is not modified")
    {
        log::debug!("[telegram] {} ignored: {}", method, description);
        return Ok(());
    }

    let status_code = parsed
        .as_ref()
        .and_then(|r| r.error_code)
        .unwrap_or_else(|| status.as_u16());

    let message = match StatusCode::from_u16(status_code) {
        Ok(StatusCode::UNAUTHORIZED) => "Bot token rejected".to_string(),
        Ok(StatusCode::TOO_MANY_REQUESTS) => "Rate limit exceeded".to_string(),
        _ => description,
    };

    Err(AppError::notification_full(message, status_code, method))
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn delete_message(&self, message_id: i64) -> Result<(), AppError> {
        self.call(
            "deleteMessage",
            &DeleteMessageRequest {
                chat_id: self.config.chat_id,
                message_id,
            },
        )
        .await
    }

    async fn edit_vote_count(&self, message_id: i64, counts: VoteCounts) -> Result<(), AppError> {
        self.call(
            "editMessageReplyMarkup",
            &EditReplyMarkupRequest {
                chat_id: self.config.chat_id,
                message_id,
                reply_markup: vote_keyboard(counts),
            },
        )
        .await
    }
}
