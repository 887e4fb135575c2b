//! The socket connector trait and its shared plumbing.
//!
//! Socket-based platforms (Discord gateway, Slack Socket Mode) implement
//! [`ChatConnector`]. A connector resolves the bot identity once, then
//! `listen` keeps a connection open, reconnecting with backoff, until the
//! cancellation token fires.

use crate::error::ConnectorError;
use crate::message::{BotIdentity, ChatMessage, Platform};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A long-lived chat platform connection.
#[async_trait]
pub trait ChatConnector: Send + Sync {
    /// The platform this connector talks to.
    fn platform(&self) -> Platform;

    /// Resolves the bot's own identity. Also serves as the credential check.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the credentials or is unreachable.
    async fn identify(&self) -> Result<BotIdentity, Report<ConnectorError>>;

    /// Runs one connection until it closes or `cancel` fires, forwarding
    /// every parsed message into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or breaks.
    async fn run_session(
        &self,
        identity: &BotIdentity,
        sink: &mpsc::Sender<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<(), Report<ConnectorError>>;
}

/// Reconnect backoff for socket sessions.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Keeps `connector` connected until `cancel` fires or the sink is dropped.
pub async fn listen(
    connector: &dyn ChatConnector,
    identity: BotIdentity,
    sink: mpsc::Sender<ChatMessage>,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
) {
    let platform = connector.platform();
    let mut backoff = policy.initial;
    while !cancel.is_cancelled() && !sink.is_closed() {
        match connector.run_session(&identity, &sink, &cancel).await {
            Ok(()) => {
                info!(%platform, "chat session closed");
                backoff = policy.initial;
            }
            Err(e) => {
                warn!(%platform, error = %e, backoff_ms = backoff.as_millis() as u64, "chat session failed");
            }
        }
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(policy.max);
    }
    info!(%platform, "chat listener stopped");
}
