//! Telegram Bot API client.
//!
//! Telegram delivers updates by webhook, so there is no socket session here:
//! the bot registers a webhook URL, and the HTTP layer hands inbound updates
//! to [`parse_update`].

use crate::error::ConnectorError;
use crate::http;
use crate::message::{BotIdentity, ChatMessage, Platform};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use tracing::instrument;

/// Default Bot API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    first_name: String,
}

/// Telegram bot client bound to one access token.
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    /// Creates a client for the given bot token.
    #[must_use]
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: http::client(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: JsonValue,
    ) -> Result<T, Report<ConnectorError>> {
        let response = self
            .http
            .post(format!("{}/bot{}/{method}", self.api_base, self.token))
            .json(&body)
            .send()
            .await
            // reqwest errors embed the URL, which carries the token.
            .map_err(|e| ConnectorError::connection(e.without_url()))?;
        let response = http::check(response, "telegram bot").await?;
        let parsed: ApiResponse<T> = http::json(response).await?;
        if !parsed.ok {
            return Err(ConnectorError::protocol(format!(
                "telegram {method} failed: {}",
                parsed.description.unwrap_or_default()
            ))
            .into());
        }
        Ok(parsed
            .result
            .ok_or_else(|| ConnectorError::protocol(format!("telegram {method} returned no result")))?)
    }

    /// Resolves the bot account through `getMe`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected or Telegram is unreachable.
    #[instrument(skip(self))]
    pub async fn get_me(&self) -> Result<BotIdentity, Report<ConnectorError>> {
        let user: User = self.call("getMe", json!({})).await?;
        Ok(BotIdentity {
            user_id: user.id.to_string(),
            username: user.username.unwrap_or(user.first_name),
            bot_id: None,
        })
    }

    /// Points the bot's webhook at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if Telegram refuses the URL.
    #[instrument(skip(self, url))]
    pub async fn set_webhook(&self, url: &str) -> Result<(), Report<ConnectorError>> {
        let _: bool = self
            .call(
                "setWebhook",
                json!({ "url": url, "allowed_updates": ["message"] }),
            )
            .await?;
        Ok(())
    }

    /// Removes the bot's webhook.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    #[instrument(skip(self))]
    pub async fn delete_webhook(&self) -> Result<(), Report<ConnectorError>> {
        let _: bool = self.call("deleteWebhook", json!({})).await?;
        Ok(())
    }
}

/// Converts a webhook update into a [`ChatMessage`].
///
/// Returns `None` for updates that are not text messages.
#[must_use]
pub fn parse_update(update: &JsonValue, identity: &BotIdentity) -> Option<ChatMessage> {
    let update_id = update.get("update_id")?.as_i64()?;
    let message = update.get("message")?;
    let message_id = message.get("message_id")?.as_i64()?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let from = message.get("from")?;
    let author_id = from.get("id")?.as_i64()?.to_string();
    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(JsonValue::as_str)?
        .to_string();

    let handle = format!("@{}", identity.username).to_lowercase();
    let mentions_bot = message
        .get("entities")
        .and_then(JsonValue::as_array)
        .is_some_and(|entities| {
            entities.iter().any(|entity| {
                entity.get("type").and_then(JsonValue::as_str) == Some("mention")
                    && entity_text(&text, entity).is_some_and(|t| t.to_lowercase() == handle)
            })
        });

    Some(ChatMessage {
        platform: Platform::Telegram,
        event_id: update_id.to_string(),
        message_id: message_id.to_string(),
        channel_id: chat_id.to_string(),
        space_id: None,
        thread_id: message
            .get("message_thread_id")
            .and_then(JsonValue::as_i64)
            .map(|id| id.to_string()),
        authored_by_bot: identity.is_author(&author_id),
        author_name: from
            .get("username")
            .or_else(|| from.get("first_name"))
            .and_then(JsonValue::as_str)
            .map(String::from),
        author_id,
        text,
        mentions_bot,
        raw: message.clone(),
    })
}

/// Slices an entity out of `text`. Offsets count UTF-16 code units.
fn entity_text(text: &str, entity: &JsonValue) -> Option<String> {
    let offset = usize::try_from(entity.get("offset")?.as_u64()?).ok()?;
    let length = usize::try_from(entity.get("length")?.as_u64()?).ok()?;
    let units: Vec<u16> = text.encode_utf16().collect();
    let slice = units.get(offset..offset.checked_add(length)?)?;
    String::from_utf16(slice).ok()
}
