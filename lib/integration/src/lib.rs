//! Platform clients for missionctl trigger listeners.
//!
//! This crate provides:
//!
//! - **Chat connectors**: Discord gateway and Slack Socket Mode sessions behind [`ChatConnector`]
//! - **Telegram**: Bot API calls and webhook update parsing
//! - **Google Sheets**: read-access probe with OAuth refresh
//! - **Watcher relay**: registration and disable calls for hosted sheet watchers

pub mod connector;
pub mod discord;
pub mod error;
mod http;
pub mod message;
pub mod relay;
pub mod sheets;
pub mod slack;
pub mod telegram;

pub use connector::{ChatConnector, ReconnectPolicy, listen};
pub use discord::DiscordConnector;
pub use error::ConnectorError;
pub use message::{BotIdentity, ChatMessage, Platform};
pub use relay::{RelayClient, RetryPolicy, WatchRequest, WatcherId};
pub use sheets::{OAuthApp, SheetCredentials, SheetInfo, SheetsAuthMode, SheetsClient};
pub use slack::SlackConnector;
pub use telegram::TelegramClient;
