//! Platform-neutral chat message types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Chat platforms with a listener implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Discord,
    Slack,
    Telegram,
}

impl Platform {
    /// Returns the platform name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The listening bot's own account on a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    /// User id of the bot account.
    pub user_id: String,
    /// Handle the bot is mentioned by.
    pub username: String,
    /// Secondary id some platforms stamp on bot-authored messages (Slack `bot_id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
}

impl BotIdentity {
    /// Returns true if `author_id` is this bot under either of its ids.
    #[must_use]
    pub fn is_author(&self, author_id: &str) -> bool {
        author_id == self.user_id || self.bot_id.as_deref() == Some(author_id)
    }
}

/// An inbound chat message, normalized across platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Platform the message arrived on.
    pub platform: Platform,
    /// Platform event id used for deduplication.
    pub event_id: String,
    /// Platform message id.
    pub message_id: String,
    /// Channel or chat the message was posted in.
    pub channel_id: String,
    /// Guild or team, where the platform has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    /// Thread the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Author id.
    pub author_id: String,
    /// Author display name, when the platform sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    /// Message text.
    pub text: String,
    /// Whether the listening bot is mentioned.
    pub mentions_bot: bool,
    /// Whether the listening bot wrote this message.
    pub authored_by_bot: bool,
    /// The platform's event object as received.
    pub raw: JsonValue,
}
