//! Discord REST and gateway client.
//!
//! Identity comes from `GET /users/@me`. The gateway session follows the
//! Hello / Identify / Heartbeat handshake and forwards `MESSAGE_CREATE`
//! dispatches as [`ChatMessage`]s.

use crate::connector::ChatConnector;
use crate::error::ConnectorError;
use crate::http;
use crate::message::{BotIdentity, ChatMessage, Platform};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Default REST base URL.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

mod op {
    pub const DISPATCH: u64 = 0;
    pub const HEARTBEAT: u64 = 1;
    pub const IDENTIFY: u64 = 2;
    pub const RECONNECT: u64 = 7;
    pub const INVALID_SESSION: u64 = 9;
    pub const HELLO: u64 = 10;
    pub const HEARTBEAT_ACK: u64 = 11;
}

/// A gateway frame.
#[derive(Debug, Deserialize)]
struct Frame {
    op: u64,
    #[serde(default)]
    d: JsonValue,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct GatewayBot {
    url: String,
}

/// Discord bot connection.
pub struct DiscordConnector {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl DiscordConnector {
    /// Creates a connector for the given bot token.
    #[must_use]
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: http::client(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    #[instrument(skip(self))]
    async fn gateway_url(&self) -> Result<String, Report<ConnectorError>> {
        let response = self
            .http
            .get(format!("{}/gateway/bot", self.api_base))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(ConnectorError::connection)?;
        let response = http::check(response, "discord gateway").await?;
        let gateway: GatewayBot = http::json(response).await?;
        Ok(format!("{}/?v=10&encoding=json", gateway.url.trim_end_matches('/')))
    }

    fn identify_frame(&self) -> WsMessage {
        let frame = json!({
            "op": op::IDENTIFY,
            "d": {
                "token": self.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "missionctl",
                    "device": "missionctl",
                },
            },
        });
        WsMessage::Text(frame.to_string())
    }
}

/// Reads frames until the gateway's Hello.
async fn wait_for_hello<S>(read: &mut S) -> Result<Frame, Report<ConnectorError>>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                let frame: Frame = serde_json::from_str(&text)
                    .map_err(|e| ConnectorError::protocol(format!("invalid frame: {e}")))?;
                if frame.op == op::HELLO {
                    return Ok(frame);
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectorError::connection(e).into()),
            None => return Err(ConnectorError::protocol("closed before hello").into()),
        }
    }
}

fn heartbeat_frame(sequence: Option<u64>) -> WsMessage {
    WsMessage::Text(json!({ "op": op::HEARTBEAT, "d": sequence }).to_string())
}

#[async_trait]
impl ChatConnector for DiscordConnector {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    #[instrument(skip(self))]
    async fn identify(&self) -> Result<BotIdentity, Report<ConnectorError>> {
        let response = self
            .http
            .get(format!("{}/users/@me", self.api_base))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(ConnectorError::connection)?;
        let response = http::check(response, "discord bot user").await?;
        let user: CurrentUser = http::json(response).await?;
        Ok(BotIdentity {
            user_id: user.id,
            username: user.username,
            bot_id: None,
        })
    }

    #[instrument(skip_all, fields(bot = %identity.username))]
    async fn run_session(
        &self,
        identity: &BotIdentity,
        sink: &mpsc::Sender<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<(), Report<ConnectorError>> {
        let url = self.gateway_url().await?;
        let connected = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(url.as_str()) => connected,
        };
        let (stream, _response) = connected.map_err(ConnectorError::connection)?;
        let (mut write, mut read) = stream.split();

        let hello = tokio::select! {
            () = cancel.cancelled() => {
                debug!("cancelled before gateway hello");
                return Ok(());
            }
            hello = wait_for_hello(&mut read) => hello?,
        };
        let heartbeat_ms = hello
            .d
            .get("heartbeat_interval")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| ConnectorError::protocol("hello without heartbeat_interval"))?;
        let period = Duration::from_millis(heartbeat_ms.max(1));

        write
            .send(self.identify_frame())
            .await
            .map_err(ConnectorError::connection)?;

        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    write
                        .send(heartbeat_frame(sequence))
                        .await
                        .map_err(ConnectorError::connection)?;
                }
                message = read.next() => {
                    let text = match message {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "discord gateway closed");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(ConnectorError::connection(e).into()),
                        None => return Ok(()),
                    };
                    let frame: Frame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed gateway frame");
                            continue;
                        }
                    };
                    if frame.s.is_some() {
                        sequence = frame.s;
                    }
                    match frame.op {
                        op::DISPATCH => match frame.t.as_deref() {
                            Some("READY") => info!("discord gateway ready"),
                            Some("MESSAGE_CREATE") => {
                                if let Some(message) = parse_message_create(&frame.d, identity) {
                                    if sink.send(message).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                            Some(other) => trace!(event = other, "ignoring dispatch"),
                            None => {}
                        },
                        op::HEARTBEAT => {
                            write
                                .send(heartbeat_frame(sequence))
                                .await
                                .map_err(ConnectorError::connection)?;
                        }
                        op::HEARTBEAT_ACK => trace!("heartbeat acknowledged"),
                        op::RECONNECT | op::INVALID_SESSION => {
                            debug!(op = frame.op, "gateway asked for a new session");
                            return Err(ConnectorError::protocol("gateway requested reconnect").into());
                        }
                        other => trace!(op = other, "ignoring gateway op"),
                    }
                }
            }
        }
    }
}

/// Converts a `MESSAGE_CREATE` payload into a [`ChatMessage`].
///
/// Returns `None` when the payload lacks an id, channel or author.
#[must_use]
pub fn parse_message_create(d: &JsonValue, identity: &BotIdentity) -> Option<ChatMessage> {
    let message_id = d.get("id")?.as_str()?.to_string();
    let channel_id = d.get("channel_id")?.as_str()?.to_string();
    let author = d.get("author")?;
    let author_id = author.get("id")?.as_str()?.to_string();

    let mentions_bot = d
        .get("mentions")
        .and_then(JsonValue::as_array)
        .is_some_and(|mentions| {
            mentions
                .iter()
                .any(|m| m.get("id").and_then(JsonValue::as_str) == Some(&identity.user_id))
        });

    Some(ChatMessage {
        platform: Platform::Discord,
        event_id: message_id.clone(),
        authored_by_bot: identity.is_author(&author_id),
        message_id,
        channel_id,
        space_id: d.get("guild_id").and_then(JsonValue::as_str).map(String::from),
        thread_id: None,
        author_name: author
            .get("username")
            .and_then(JsonValue::as_str)
            .map(String::from),
        author_id,
        text: d
            .get("content")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        mentions_bot,
        raw: d.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity() -> BotIdentity {
        BotIdentity {
            user_id: "900".to_string(),
            username: "missionbot".to_string(),
            bot_id: None,
        }
    }

    #[test]
    fn parses_message_with_mention() {
        let d = json!({
            "id": "111",
            "channel_id": "222",
            "guild_id": "333",
            "author": {"id": "444", "username": "ada"},
            "content": "<@900> deploy please",
            "mentions": [{"id": "900", "username": "missionbot"}],
        });
        let message = parse_message_create(&d, &identity()).unwrap();
        assert_eq!(message.event_id, "111");
        assert_eq!(message.space_id.as_deref(), Some("333"));
        assert_eq!(message.author_name.as_deref(), Some("ada"));
        assert!(message.mentions_bot);
        assert!(!message.authored_by_bot);
    }

    #[test]
    fn own_messages_are_marked() {
        let d = json!({
            "id": "112",
            "channel_id": "222",
            "author": {"id": "900", "username": "missionbot", "bot": true},
            "content": "done",
            "mentions": [],
        });
        let message = parse_message_create(&d, &identity()).unwrap();
        assert!(message.authored_by_bot);
        assert!(!message.mentions_bot);
    }

    #[test]
    fn incomplete_payload_is_skipped() {
        assert!(parse_message_create(&json!({"id": "1"}), &identity()).is_none());
    }

    #[tokio::test]
    async fn identify_reads_current_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("authorization", "Bot secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "900", "username": "missionbot"})),
            )
            .mount(&server)
            .await;

        let connector = DiscordConnector::new("secret", server.uri());
        let identity = connector.identify().await.unwrap();
        assert_eq!(identity.user_id, "900");
        assert_eq!(identity.username, "missionbot");
    }

    #[tokio::test]
    async fn identify_rejects_bad_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("401: Unauthorized"))
            .mount(&server)
            .await;

        let connector = DiscordConnector::new("wrong", server.uri());
        let err = connector.identify().await.unwrap_err();
        assert!(err.to_string().contains("authentication failed"));
    }

    #[tokio::test]
    async fn cancel_during_handshake_ends_session() {
        // A gateway that accepts the socket but never sends Hello.
        let gateway = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = gateway.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = gateway.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            std::future::pending::<()>().await;
        });

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": format!("ws://{addr}")})))
            .mount(&server)
            .await;

        let connector = DiscordConnector::new("secret", server.uri());
        let cancel = CancellationToken::new();
        let session = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let (tx, _rx) = mpsc::channel(1);
                connector.run_session(&identity(), &tx, &cancel).await
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session should stop on cancel")
            .unwrap();
        assert!(result.is_ok());
    }
}
