//! Typed per-kind trigger configuration.
//!
//! Node configs arrive as opaque JSON maps. [`TriggerConfig::parse`] turns one
//! into the typed shape for its kind, or a `ValidationError` naming the field.

use crate::error::TriggerFailure;
use crate::kind::TriggerKind;
use chrono::FixedOffset;
use missionctl_core::TriggerNodeId;
use missionctl_integration::{SheetCredentials, SheetsAuthMode};
use missionctl_scheduler::ScheduleSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A credential string that never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Which chat messages start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageMode {
    /// Every message that does not mention the bot.
    AllMessages,
    /// Only messages that mention the bot.
    TaggedMessages,
}

impl MessageMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "all_messages" => Some(Self::AllMessages),
            "tagged_messages" => Some(Self::TaggedMessages),
            _ => None,
        }
    }
}

/// Discord bot listener config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordConfig {
    pub bot_token: Secret,
    pub mode: MessageMode,
}

/// Slack Socket Mode listener config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackConfig {
    pub bot_token: Secret,
    pub app_token: Secret,
    pub mode: MessageMode,
}

/// Telegram webhook bot config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub access_token: Secret,
}

/// Spreadsheet watcher config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetConfig {
    pub file_id: String,
    pub credentials: SheetCredentials,
}

/// A validated trigger config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerConfig {
    ScheduledTimer(ScheduleSpec),
    Discord(DiscordConfig),
    Slack(SlackConfig),
    Telegram(TelegramConfig),
    Webhook,
    ChatWindow,
    SpreadsheetChange(SpreadsheetConfig),
}

impl TriggerConfig {
    /// Parses `raw` as the config of a `kind` node.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if a required field is missing or malformed.
    pub fn parse(
        kind: TriggerKind,
        raw: &JsonValue,
        reference: FixedOffset,
    ) -> Result<Self, TriggerFailure> {
        let config = match kind {
            TriggerKind::ScheduledTimer => {
                Self::ScheduledTimer(ScheduleSpec::from_config(raw, reference)?)
            }
            TriggerKind::Discord => Self::Discord(DiscordConfig {
                bot_token: secret(raw, "bot_token")?,
                mode: mode(raw)?,
            }),
            TriggerKind::Slack => Self::Slack(SlackConfig {
                bot_token: secret(raw, "bot_token")?,
                app_token: secret(raw, "app_token")?,
                mode: mode(raw)?,
            }),
            TriggerKind::Telegram => Self::Telegram(TelegramConfig {
                access_token: secret(raw, "access_token")?,
            }),
            TriggerKind::Webhook => Self::Webhook,
            TriggerKind::ChatWindow => Self::ChatWindow,
            TriggerKind::SpreadsheetChange => Self::SpreadsheetChange(spreadsheet(raw)?),
        };
        Ok(config)
    }

    /// Returns the kind this config belongs to.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::ScheduledTimer(_) => TriggerKind::ScheduledTimer,
            Self::Discord(_) => TriggerKind::Discord,
            Self::Slack(_) => TriggerKind::Slack,
            Self::Telegram(_) => TriggerKind::Telegram,
            Self::Webhook => TriggerKind::Webhook,
            Self::ChatWindow => TriggerKind::ChatWindow,
            Self::SpreadsheetChange(_) => TriggerKind::SpreadsheetChange,
        }
    }

    /// The external identity a listener with this config occupies.
    ///
    /// Bot credentials for chat kinds; the node itself otherwise.
    #[must_use]
    pub fn unique_key(&self, node: &TriggerNodeId) -> UniqueKey {
        match self {
            Self::Discord(c) => UniqueKey(format!("discord:{}", c.bot_token.expose())),
            Self::Slack(c) => UniqueKey(format!("slack:{}", c.app_token.expose())),
            Self::Telegram(c) => UniqueKey(format!("telegram:{}", c.access_token.expose())),
            _ => UniqueKey(node.to_string()),
        }
    }
}

/// Identity a listener occupies. May embed a credential, so it has no
/// `Display` and a redacted `Debug`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey(String);

impl UniqueKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once(':') {
            Some((platform, _)) => write!(f, "UniqueKey({platform}:<redacted>)"),
            None => write!(f, "UniqueKey({})", self.0),
        }
    }
}

fn text<'a>(raw: &'a JsonValue, name: &str) -> Result<&'a str, TriggerFailure> {
    match raw.get(name) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(JsonValue::String(_)) | None | Some(JsonValue::Null) => Err(TriggerFailure::validation(
            format!("The '{name}' field is required."),
            format!("missing config field '{name}'"),
        )
        .with_data("field", name)),
        Some(_) => Err(TriggerFailure::validation(
            format!("The '{name}' field must be text."),
            format!("config field '{name}' is not a string"),
        )
        .with_data("field", name)),
    }
}

fn secret(raw: &JsonValue, name: &str) -> Result<Secret, TriggerFailure> {
    text(raw, name).map(Secret::new)
}

fn mode(raw: &JsonValue) -> Result<MessageMode, TriggerFailure> {
    let value = text(raw, "trigger_type")?;
    MessageMode::parse(value).ok_or_else(|| {
        TriggerFailure::validation(
            "Choose whether to respond to all messages or only tagged messages.",
            format!("unknown trigger_type '{value}'"),
        )
        .with_data("field", "trigger_type")
    })
}

fn spreadsheet(raw: &JsonValue) -> Result<SpreadsheetConfig, TriggerFailure> {
    let auth_mode = match text(raw, "auth_mode")? {
        "oauth2" => SheetsAuthMode::OAuth2,
        "access_token" => SheetsAuthMode::AccessToken,
        other => {
            return Err(TriggerFailure::validation(
                "Unsupported Google Sheets authentication mode.",
                format!("unknown auth_mode '{other}'"),
            )
            .with_data("field", "auth_mode"));
        }
    };
    let refresh_token = match auth_mode {
        SheetsAuthMode::OAuth2 => Some(text(raw, "refresh_token")?.to_string()),
        SheetsAuthMode::AccessToken => raw
            .get("refresh_token")
            .and_then(JsonValue::as_str)
            .map(String::from),
    };
    Ok(SpreadsheetConfig {
        file_id: text(raw, "file_id")?.to_string(),
        credentials: SheetCredentials {
            auth_mode,
            access_token: text(raw, "access_token")?.to_string(),
            refresh_token,
        },
    })
}
