//! Runtime settings for trigger listeners.
//!
//! Loaded as part of the server configuration; every field has a default so
//! an empty environment yields a working local setup.

use chrono::{FixedOffset, Offset, Utc};
use missionctl_integration::{OAuthApp, RetryPolicy, discord, sheets, slack, telegram};
use serde::Deserialize;
use std::time::Duration;

/// Trigger listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerSettings {
    /// Externally reachable base URL of this server, used in webhook callbacks.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Base URL of the watcher relay.
    #[serde(default = "default_relay_base_url")]
    pub relay_base_url: String,

    /// Watcher registration attempts.
    #[serde(default = "default_relay_attempts")]
    pub relay_attempts: u32,

    /// Wait between watcher registration attempts, in seconds.
    #[serde(default = "default_relay_backoff_seconds")]
    pub relay_backoff_seconds: u64,

    /// How long a seen chat event id suppresses repeats, in seconds.
    #[serde(default = "default_dedup_ttl_seconds")]
    pub dedup_ttl_seconds: u64,

    /// Interval between dedup cache sweeps, in seconds.
    #[serde(default = "default_dedup_sweep_seconds")]
    pub dedup_sweep_seconds: u64,

    /// Burst window collapsed by the chat debouncer, in milliseconds.
    #[serde(default = "default_debounce_millis")]
    pub debounce_millis: u64,

    /// UTC offset schedules are evaluated in, in minutes.
    #[serde(default)]
    pub reference_offset_minutes: i32,

    /// Google OAuth client used to refresh spreadsheet tokens.
    #[serde(default)]
    pub google_client_id: Option<String>,

    #[serde(default)]
    pub google_client_secret: Option<String>,

    /// Platform API endpoints. Overridable for tests and proxies.
    #[serde(default)]
    pub endpoints: PlatformEndpoints,
}

/// Base URLs for the platform APIs.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformEndpoints {
    #[serde(default = "default_discord_api")]
    pub discord_api: String,
    #[serde(default = "default_slack_api")]
    pub slack_api: String,
    #[serde(default = "default_telegram_api")]
    pub telegram_api: String,
    #[serde(default = "default_sheets_api")]
    pub sheets_api: String,
    #[serde(default = "default_google_token_url")]
    pub google_token_url: String,
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_relay_base_url() -> String {
    "http://localhost:8787".to_string()
}

fn default_relay_attempts() -> u32 {
    3
}

fn default_relay_backoff_seconds() -> u64 {
    5
}

fn default_dedup_ttl_seconds() -> u64 {
    600
}

fn default_dedup_sweep_seconds() -> u64 {
    60
}

fn default_debounce_millis() -> u64 {
    100
}

fn default_discord_api() -> String {
    discord::DEFAULT_API_BASE.to_string()
}

fn default_slack_api() -> String {
    slack::DEFAULT_API_BASE.to_string()
}

fn default_telegram_api() -> String {
    telegram::DEFAULT_API_BASE.to_string()
}

fn default_sheets_api() -> String {
    sheets::DEFAULT_API_BASE.to_string()
}

fn default_google_token_url() -> String {
    sheets::DEFAULT_TOKEN_URL.to_string()
}

impl Default for PlatformEndpoints {
    fn default() -> Self {
        Self {
            discord_api: default_discord_api(),
            slack_api: default_slack_api(),
            telegram_api: default_telegram_api(),
            sheets_api: default_sheets_api(),
            google_token_url: default_google_token_url(),
        }
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
            relay_base_url: default_relay_base_url(),
            relay_attempts: default_relay_attempts(),
            relay_backoff_seconds: default_relay_backoff_seconds(),
            dedup_ttl_seconds: default_dedup_ttl_seconds(),
            dedup_sweep_seconds: default_dedup_sweep_seconds(),
            debounce_millis: default_debounce_millis(),
            reference_offset_minutes: 0,
            google_client_id: None,
            google_client_secret: None,
            endpoints: PlatformEndpoints::default(),
        }
    }
}

impl TriggerSettings {
    /// The fixed timezone schedules are evaluated in. Out-of-range offsets fall back to UTC.
    #[must_use]
    pub fn reference_offset(&self) -> FixedOffset {
        self.reference_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    #[must_use]
    pub fn relay_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.relay_attempts,
            backoff: Duration::from_secs(self.relay_backoff_seconds),
        }
    }

    #[must_use]
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_seconds)
    }

    #[must_use]
    pub fn dedup_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_sweep_seconds.max(1))
    }

    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_millis)
    }

    /// The OAuth client for token refresh, when both halves are configured.
    #[must_use]
    pub fn google_oauth(&self) -> Option<OAuthApp> {
        Some(OAuthApp {
            token_url: self.endpoints.google_token_url.clone(),
            client_id: self.google_client_id.clone()?,
            client_secret: self.google_client_secret.clone()?,
        })
    }

    /// Public callback URL for a path below the server root.
    #[must_use]
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
