//! Webhook-delivered Telegram bots.
//!
//! Telegram pushes updates to `/webhooks/telegram/{token}`; the route keyed
//! by the bot token feeds them into the listener's message pipeline.

use super::Acquired;
use super::chat::{bot_detail, chat_sink};
use crate::config::TelegramConfig;
use crate::context::ListenerTarget;
use crate::error::TriggerFailure;
use crate::inbound::{InboundHandler, InboundKey};
use crate::registry::ListenerHandle;
use crate::services::TriggerServices;
use async_trait::async_trait;
use missionctl_integration::telegram::parse_update;
use missionctl_integration::{BotIdentity, ChatMessage, Platform, TelegramClient};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct UpdateRoute {
    identity: BotIdentity,
    sink: mpsc::Sender<ChatMessage>,
}

#[async_trait]
impl InboundHandler for UpdateRoute {
    async fn handle(&self, body: JsonValue) -> Result<(), TriggerFailure> {
        let Some(message) = parse_update(&body, &self.identity) else {
            debug!("ignoring telegram update without message text");
            return Ok(());
        };
        self.sink
            .send(message)
            .await
            .map_err(|_| TriggerFailure::internal("telegram listener is shutting down").at("telegram.route"))
    }
}

pub(super) async fn start(
    services: &TriggerServices,
    target: &ListenerTarget,
    config: &TelegramConfig,
) -> Result<Acquired, TriggerFailure> {
    let token = config.access_token.expose();
    let client = TelegramClient::new(token, services.settings.endpoints.telegram_api.clone());
    let identity = client
        .get_me()
        .await
        .map_err(|e| TriggerFailure::external("Telegram", &e))?;
    let detail = bot_detail(Platform::Telegram, &identity);

    let cancel = CancellationToken::new();
    let sink = chat_sink(services, target, None, &cancel);
    let route = InboundKey::BotToken(token.to_string());
    if !services
        .router
        .register(route.clone(), Arc::new(UpdateRoute { identity, sink }))
    {
        cancel.cancel();
        return Err(TriggerFailure::conflict(
            "This Telegram bot is already connected to another trigger.",
            "a webhook route for this bot token is already active",
        )
        .with_data("field", "access_token"));
    }

    let webhook_url = services
        .settings
        .public_url(&format!("/webhooks/telegram/{token}"));
    if let Err(e) = client.set_webhook(&webhook_url).await {
        services.router.unregister(&route);
        cancel.cancel();
        return Err(TriggerFailure::external("Telegram", &e));
    }

    Ok(Acquired {
        handle: ListenerHandle::TelegramWebhook {
            access_token: config.access_token.clone(),
            route,
            cancel,
        },
        detail,
    })
}
