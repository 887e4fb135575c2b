//! Slack Web API and Socket Mode client.
//!
//! The bot token resolves identity through `auth.test`; the app-level token
//! opens Socket Mode connections through `apps.connections.open`. Every
//! envelope carrying an `envelope_id` is acknowledged before it is parsed.

use crate::connector::ChatConnector;
use crate::error::ConnectorError;
use crate::http;
use crate::message::{BotIdentity, ChatMessage, Platform};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Default Web API base URL.
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Message subtypes that still carry a user-authored message.
const USER_SUBTYPES: &[&str] = &["thread_broadcast", "file_share", "bot_message"];

#[derive(Debug, Deserialize)]
struct AuthTest {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpen {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: JsonValue,
}

/// Slack bot connection over Socket Mode.
pub struct SlackConnector {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: String,
}

impl SlackConnector {
    /// Creates a connector from a bot token and an app-level token.
    #[must_use]
    pub fn new(
        bot_token: impl Into<String>,
        app_token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            http: http::client(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            app_token: app_token.into(),
        }
    }

    /// Requests a Socket Mode websocket URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the app token is rejected or Slack is unreachable.
    #[instrument(skip(self))]
    pub async fn open_connection(&self) -> Result<String, Report<ConnectorError>> {
        let response = self
            .http
            .post(format!("{}/apps.connections.open", self.api_base))
            .bearer_auth(&self.app_token)
            .send()
            .await
            .map_err(ConnectorError::connection)?;
        let response = http::check(response, "slack socket mode").await?;
        let opened: ConnectionsOpen = http::json(response).await?;
        if !opened.ok {
            return Err(api_error(opened.error).into());
        }
        Ok(opened
            .url
            .ok_or_else(|| ConnectorError::protocol("apps.connections.open returned no url"))?)
    }
}

fn api_error(code: Option<String>) -> ConnectorError {
    let code = code.unwrap_or_else(|| "unknown_error".to_string());
    match code.as_str() {
        "invalid_auth" | "not_authed" | "token_revoked" | "account_inactive"
        | "not_allowed_token_type" => ConnectorError::AuthenticationFailed { reason: code },
        "ratelimited" => ConnectorError::RateLimited {
            retry_after_secs: None,
        },
        _ => ConnectorError::protocol(format!("slack api error: {code}")),
    }
}

#[async_trait]
impl ChatConnector for SlackConnector {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    #[instrument(skip(self))]
    async fn identify(&self) -> Result<BotIdentity, Report<ConnectorError>> {
        let response = self
            .http
            .post(format!("{}/auth.test", self.api_base))
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map_err(ConnectorError::connection)?;
        let response = http::check(response, "slack workspace").await?;
        let auth: AuthTest = http::json(response).await?;
        if !auth.ok {
            return Err(api_error(auth.error).into());
        }
        let user_id = auth
            .user_id
            .ok_or_else(|| ConnectorError::protocol("auth.test returned no user_id"))?;
        Ok(BotIdentity {
            username: auth.user.unwrap_or_else(|| user_id.clone()),
            user_id,
            bot_id: auth.bot_id,
        })
    }

    #[instrument(skip_all, fields(bot = %identity.username))]
    async fn run_session(
        &self,
        identity: &BotIdentity,
        sink: &mpsc::Sender<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<(), Report<ConnectorError>> {
        let url = self.open_connection().await?;
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(ConnectorError::connection)?;
        let (mut write, mut read) = stream.split();

        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                message = read.next() => message,
            };
            let text = match message {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "slack socket closed");
                    return Ok(());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ConnectorError::connection(e).into()),
                None => return Ok(()),
            };
            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "skipping malformed socket mode envelope");
                    continue;
                }
            };
            if let Some(envelope_id) = &envelope.envelope_id {
                write
                    .send(WsMessage::Text(
                        json!({ "envelope_id": envelope_id }).to_string(),
                    ))
                    .await
                    .map_err(ConnectorError::connection)?;
            }
            match envelope.kind.as_str() {
                "hello" => debug!("slack socket mode connected"),
                "disconnect" => {
                    info!(reason = ?envelope.payload.get("reason"), "slack asked for reconnect");
                    return Ok(());
                }
                "events_api" => {
                    if let Some(message) = parse_event_payload(&envelope.payload, identity) {
                        if sink.send(message).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                other => trace!(kind = other, "ignoring envelope"),
            }
        }
    }
}

/// Converts an Events API payload into a [`ChatMessage`].
///
/// Slack delivers both `message` and `app_mention` for one mention, so the
/// event id is `{channel}:{ts}` and the two collapse under deduplication.
#[must_use]
pub fn parse_event_payload(payload: &JsonValue, identity: &BotIdentity) -> Option<ChatMessage> {
    let event = payload.get("event")?;
    let kind = event.get("type")?.as_str()?;
    if kind != "message" && kind != "app_mention" {
        return None;
    }
    if let Some(subtype) = event.get("subtype").and_then(JsonValue::as_str) {
        if !USER_SUBTYPES.contains(&subtype) {
            return None;
        }
    }

    let channel_id = event.get("channel")?.as_str()?.to_string();
    let ts = event.get("ts")?.as_str()?.to_string();
    let author_id = event
        .get("user")
        .or_else(|| event.get("bot_id"))
        .and_then(JsonValue::as_str)?
        .to_string();
    let text = event
        .get("text")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let posted_by_own_bot = event
        .get("bot_id")
        .and_then(JsonValue::as_str)
        .is_some_and(|bot_id| identity.bot_id.as_deref() == Some(bot_id));

    Some(ChatMessage {
        platform: Platform::Slack,
        event_id: format!("{channel_id}:{ts}"),
        message_id: ts,
        space_id: payload
            .get("team_id")
            .and_then(JsonValue::as_str)
            .map(String::from),
        thread_id: event
            .get("thread_ts")
            .and_then(JsonValue::as_str)
            .map(String::from),
        channel_id,
        authored_by_bot: identity.is_author(&author_id) || posted_by_own_bot,
        mentions_bot: kind == "app_mention" || text.contains(&format!("<@{}>", identity.user_id)),
        author_name: None,
        author_id,
        text,
        raw: event.clone(),
    })
}
