//! The closed set of trigger kinds, with their metadata and config schemas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every trigger kind a workflow node can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ScheduledTimer,
    Discord,
    Slack,
    Telegram,
    Webhook,
    ChatWindow,
    SpreadsheetChange,
}

impl TriggerKind {
    /// All kinds, in display order.
    pub const ALL: [Self; 7] = [
        Self::ScheduledTimer,
        Self::Discord,
        Self::Slack,
        Self::Telegram,
        Self::Webhook,
        Self::ChatWindow,
        Self::SpreadsheetChange,
    ];

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScheduledTimer => "scheduled_timer",
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Telegram => "telegram",
            Self::Webhook => "webhook",
            Self::ChatWindow => "chat_window",
            Self::SpreadsheetChange => "spreadsheet_change",
        }
    }

    /// Whether listeners of this kind occupy a credential that only one
    /// listener process-wide may hold.
    #[must_use]
    pub fn has_shared_identity(&self) -> bool {
        matches!(self, Self::Discord | Self::Slack | Self::Telegram)
    }

    /// Returns display metadata.
    #[must_use]
    pub fn metadata(&self) -> TriggerMetadata {
        let (name, description, category) = match self {
            Self::ScheduledTimer => (
                "Schedule",
                "Runs the workflow on an interval, once, or on calendar dates.",
                TriggerCategory::Schedule,
            ),
            Self::Discord => (
                "Discord message",
                "Runs the workflow when a Discord bot receives a message.",
                TriggerCategory::Chat,
            ),
            Self::Slack => (
                "Slack message",
                "Runs the workflow when a Slack app receives a message over Socket Mode.",
                TriggerCategory::Chat,
            ),
            Self::Telegram => (
                "Telegram message",
                "Runs the workflow when a Telegram bot receives a message.",
                TriggerCategory::Chat,
            ),
            Self::Webhook => (
                "Webhook",
                "Runs the workflow when its webhook URL receives a request.",
                TriggerCategory::Webhook,
            ),
            Self::ChatWindow => (
                "Chat window",
                "Runs the workflow for each message typed into its chat window.",
                TriggerCategory::Chat,
            ),
            Self::SpreadsheetChange => (
                "Google Sheets change",
                "Runs the workflow when a watched spreadsheet changes.",
                TriggerCategory::Data,
            ),
        };
        TriggerMetadata {
            kind: *self,
            name: name.to_string(),
            description: description.to_string(),
            category,
            requires_credentials: matches!(
                self,
                Self::Discord | Self::Slack | Self::Telegram | Self::SpreadsheetChange
            ),
        }
    }

    /// Returns the fields a node of this kind is configured with.
    #[must_use]
    pub fn config_schema(&self) -> Vec<ConfigField> {
        match self {
            Self::ScheduledTimer => schedule_schema(),
            Self::Discord => vec![
                ConfigField::secret("bot_token", "Bot token"),
                message_mode_field(),
            ],
            Self::Slack => vec![
                ConfigField::secret("bot_token", "Bot token (xoxb-)"),
                ConfigField::secret("app_token", "App-level token (xapp-)"),
                message_mode_field(),
            ],
            Self::Telegram => vec![ConfigField::secret("access_token", "Bot access token")],
            Self::Webhook | Self::ChatWindow => Vec::new(),
            Self::SpreadsheetChange => vec![
                ConfigField::select("auth_mode", "Authentication", &["oauth2", "access_token"]),
                ConfigField::secret("access_token", "Access token"),
                ConfigField::secret("refresh_token", "Refresh token").optional(),
                ConfigField::text("file_id", "Spreadsheet ID"),
            ],
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown trigger kind '{s}'"))
    }
}

/// Grouping used by node pickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCategory {
    Schedule,
    Chat,
    Webhook,
    Data,
}

/// Display metadata for a trigger kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMetadata {
    pub kind: TriggerKind,
    pub name: String,
    pub description: String,
    pub category: TriggerCategory,
    pub requires_credentials: bool,
}

/// Input widget for a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Secret,
    Number,
    Select,
    MultiSelect,
    DateTime,
    Time,
}

/// One configurable field of a trigger node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ConfigField {
    fn new(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: true,
            options: Vec::new(),
        }
    }

    fn text(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::Text)
    }

    fn secret(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::Secret)
    }

    fn select(name: &str, label: &str, options: &[&str]) -> Self {
        Self {
            options: options.iter().map(ToString::to_string).collect(),
            ..Self::new(name, label, FieldType::Select)
        }
    }

    fn multi_select(name: &str, label: &str, options: &[&str]) -> Self {
        Self {
            field_type: FieldType::MultiSelect,
            ..Self::select(name, label, options)
        }
    }

    fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

fn message_mode_field() -> ConfigField {
    ConfigField::select(
        "trigger_type",
        "Respond to",
        &["all_messages", "tagged_messages"],
    )
}

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const MONTHS: [&str; 13] = [
    "all",
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

fn schedule_schema() -> Vec<ConfigField> {
    let days: Vec<String> = std::iter::once("all".to_string())
        .chain((1..=31).map(|d: u32| d.to_string()))
        .collect();
    let day_refs: Vec<&str> = days.iter().map(String::as_str).collect();
    vec![
        ConfigField::select(
            "schedule_type",
            "Schedule",
            &["interval", "once", "daily", "weekly", "monthly", "specified_dates"],
        ),
        ConfigField::new("interval_minutes", "Every (minutes)", FieldType::Number).optional(),
        ConfigField::new("date_time", "Run at", FieldType::DateTime).optional(),
        ConfigField::new("time", "Time of day", FieldType::Time).optional(),
        ConfigField::multi_select("weekly_days", "Days of week", &WEEKDAYS).optional(),
        ConfigField::multi_select("monthly_days", "Days of month", &day_refs[1..]).optional(),
        ConfigField::multi_select("months", "Months", &MONTHS).optional(),
        ConfigField::multi_select("days", "Days", &day_refs).optional(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in TriggerKind::ALL {
            assert_eq!(kind.as_str().parse::<TriggerKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
        assert!("cron".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn passive_kinds_have_empty_schema() {
        assert!(TriggerKind::Webhook.config_schema().is_empty());
        assert!(TriggerKind::ChatWindow.config_schema().is_empty());
        assert!(!TriggerKind::Webhook.metadata().requires_credentials);
    }

    #[test]
    fn slack_schema_requires_app_token() {
        let schema = TriggerKind::Slack.config_schema();
        let app = schema.iter().find(|f| f.name == "app_token").unwrap();
        assert!(app.required);
        assert_eq!(app.field_type, FieldType::Secret);
    }

    #[test]
    fn schedule_schema_lists_all_modes() {
        let schema = TriggerKind::ScheduledTimer.config_schema();
        assert_eq!(schema[0].name, "schedule_type");
        assert_eq!(schema[0].options.len(), 6);
        let monthly = schema.iter().find(|f| f.name == "monthly_days").unwrap();
        assert_eq!(monthly.options.len(), 31);
    }

    #[test]
    fn only_chat_bots_share_identity() {
        let shared: Vec<_> = TriggerKind::ALL
            .into_iter()
            .filter(TriggerKind::has_shared_identity)
            .collect();
        assert_eq!(
            shared,
            vec![TriggerKind::Discord, TriggerKind::Slack, TriggerKind::Telegram]
        );
    }
}
