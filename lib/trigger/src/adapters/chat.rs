//! Socket-connected chat bots (Discord gateway, Slack Socket Mode).

use super::Acquired;
use crate::config::{DiscordConfig, MessageMode, SlackConfig};
use crate::context::{ListenerTarget, ResourceDetail};
use crate::dedup::DedupCache;
use crate::error::TriggerFailure;
use crate::filter::{MessageFilter, spawn_chat_pipeline};
use crate::registry::ListenerHandle;
use crate::services::TriggerServices;
use missionctl_integration::{
    BotIdentity, ChatConnector, ChatMessage, DiscordConnector, Platform, ReconnectPolicy, SlackConnector,
    listen,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PIPELINE_CAPACITY: usize = 64;

/// Spawns the dedup sweeper and message pipeline for one chat listener and
/// returns the sender events are pushed into.
///
/// The pipeline ends when every sender is dropped; the sweeper when `cancel` fires.
pub(super) fn chat_sink(
    services: &TriggerServices,
    target: &ListenerTarget,
    mode: Option<MessageMode>,
    cancel: &CancellationToken,
) -> mpsc::Sender<ChatMessage> {
    let seen = DedupCache::new(services.settings.dedup_ttl());
    seen.spawn_sweeper(services.settings.dedup_sweep_interval(), cancel.clone());
    let (tx, rx) = mpsc::channel(PIPELINE_CAPACITY);
    spawn_chat_pipeline(
        rx,
        services.settings.debounce_window(),
        MessageFilter::new(mode, seen),
        target.clone(),
    );
    tx
}

pub(super) fn bot_detail(platform: Platform, identity: &BotIdentity) -> ResourceDetail {
    ResourceDetail::ChatBot {
        platform,
        bot_user_id: identity.user_id.clone(),
        bot_username: identity.username.clone(),
    }
}

pub(super) async fn start_discord(
    services: &TriggerServices,
    target: &ListenerTarget,
    config: &DiscordConfig,
) -> Result<Acquired, TriggerFailure> {
    let connector = DiscordConnector::new(
        config.bot_token.expose(),
        services.settings.endpoints.discord_api.clone(),
    );
    start_socket(services, target, Arc::new(connector), config.mode, "Discord").await
}

pub(super) async fn start_slack(
    services: &TriggerServices,
    target: &ListenerTarget,
    config: &SlackConfig,
) -> Result<Acquired, TriggerFailure> {
    let connector = SlackConnector::new(
        config.bot_token.expose(),
        config.app_token.expose(),
        services.settings.endpoints.slack_api.clone(),
    );
    // The bot token is checked by identify; this checks the app token.
    connector
        .open_connection()
        .await
        .map_err(|e| TriggerFailure::external("Slack", &e).with_data("field", "app_token"))?;
    start_socket(services, target, Arc::new(connector), config.mode, "Slack").await
}

async fn start_socket(
    services: &TriggerServices,
    target: &ListenerTarget,
    connector: Arc<dyn ChatConnector>,
    mode: MessageMode,
    service: &str,
) -> Result<Acquired, TriggerFailure> {
    let identity = connector
        .identify()
        .await
        .map_err(|e| TriggerFailure::external(service, &e))?;
    let platform = connector.platform();
    let detail = bot_detail(platform, &identity);

    let cancel = CancellationToken::new();
    let sink = chat_sink(services, target, Some(mode), &cancel);
    let session_cancel = cancel.clone();
    tokio::spawn(async move {
        listen(
            connector.as_ref(),
            identity,
            sink,
            session_cancel,
            ReconnectPolicy::default(),
        )
        .await;
    });

    Ok(Acquired {
        handle: ListenerHandle::Socket { platform, cancel },
        detail,
    })
}
