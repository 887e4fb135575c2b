//! Per-kind listener adapters.
//!
//! Each adapter acquires its external resource and returns the handle. The
//! shared [`start`] then records the listener and registers its shutdown
//! cleanup, releasing the handle again if the record cannot be stored.

mod chat;
mod passive;
mod scheduled;
mod sheets;
mod telegram;

use crate::config::TriggerConfig;
use crate::context::{ListenerStore, ResourceDetail, ResourceInfo, StartContext};
use crate::error::TriggerFailure;
use crate::registry::{ListenerHandle, ListenerRecord};
use crate::services::TriggerServices;
use chrono::Utc;
use missionctl_core::{TriggerNodeId, flatten_report};
use missionctl_integration::TelegramClient;
use std::sync::Arc;
use tracing::{info, warn};

/// What an adapter acquired.
pub(crate) struct Acquired {
    pub(crate) handle: ListenerHandle,
    pub(crate) detail: ResourceDetail,
}

/// Acquires the resource for `ctx`, records it, and wires shutdown cleanup.
pub(crate) async fn start(
    services: &TriggerServices,
    ctx: StartContext,
) -> Result<ResourceInfo, TriggerFailure> {
    let kind = ctx.kind();
    let acquired = match &ctx.config {
        TriggerConfig::ScheduledTimer(spec) => scheduled::start(services, &ctx.target, spec),
        TriggerConfig::Discord(config) => chat::start_discord(services, &ctx.target, config).await,
        TriggerConfig::Slack(config) => chat::start_slack(services, &ctx.target, config).await,
        TriggerConfig::Telegram(config) => telegram::start(services, &ctx.target, config).await,
        TriggerConfig::Webhook | TriggerConfig::ChatWindow => {
            passive::start(services, &ctx.target, kind)
        }
        TriggerConfig::SpreadsheetChange(config) => {
            sheets::start(services, &ctx.target, config).await
        }
    }
    .map_err(|e| e.at(format!("{kind}.start")))?;

    commit(services, ctx, acquired).await
}

async fn commit(
    services: &TriggerServices,
    ctx: StartContext,
    acquired: Acquired,
) -> Result<ResourceInfo, TriggerFailure> {
    let node = ctx.trigger_node_id();
    let kind = ctx.kind();
    let record = ListenerRecord {
        trigger_node_id: node,
        workflow_id: ctx.target.workflow_id,
        kind,
        unique_key: ctx.config.unique_key(&node),
        handle: acquired.handle.clone(),
        config_digest: ctx.config_digest,
        started_at: Utc::now(),
    };

    if let Err(e) = ctx.store.store_listener(record).await {
        warn!(trigger_node_id = %node, %kind, error = %e, "failed to store listener, releasing");
        if let Err(release_error) = release(services, &acquired.handle).await {
            warn!(trigger_node_id = %node, error = %release_error, "rollback release failed");
        }
        return Err(TriggerFailure::internal(format!(
            "failed to record listener: {}",
            flatten_report(&e)
        ))
            .with_data("triggerNodeId", node.to_string())
            .at("registry.store")
            .at(format!("{kind}.start")));
    }

    register_cleanup(services, Arc::clone(&ctx.store), node, acquired.handle);
    info!(trigger_node_id = %node, %kind, "listener started");
    Ok(ResourceInfo {
        trigger_node_id: node,
        kind,
        detail: acquired.detail,
    })
}

fn register_cleanup(
    services: &TriggerServices,
    store: Arc<dyn ListenerStore>,
    node: TriggerNodeId,
    handle: ListenerHandle,
) {
    let cleanup_services = services.clone();
    services.shutdown.register(node, move || async move {
        store.remove_listener(&node).await;
        if let Err(e) = release(&cleanup_services, &handle).await {
            warn!(trigger_node_id = %node, error = %e, "shutdown release failed");
        }
    });
}

/// Tears down a listener resource.
///
/// Local state (routes, tasks, timers) is always released; the error only
/// reports a failed remote call.
pub(crate) async fn release(
    services: &TriggerServices,
    handle: &ListenerHandle,
) -> Result<(), TriggerFailure> {
    match handle {
        ListenerHandle::Timer(timer) => {
            timer.cancel();
            Ok(())
        }
        ListenerHandle::Socket { cancel, .. } => {
            cancel.cancel();
            Ok(())
        }
        ListenerHandle::TelegramWebhook {
            access_token,
            route,
            cancel,
        } => {
            services.router.unregister(route);
            cancel.cancel();
            TelegramClient::new(
                access_token.expose(),
                services.settings.endpoints.telegram_api.clone(),
            )
            .delete_webhook()
            .await
            .map_err(|e| TriggerFailure::external("Telegram", &e).at("telegram.release"))
        }
        ListenerHandle::RelayWatcher { watcher_id, route } => {
            services.router.unregister(route);
            services
                .relay
                .disable_watcher(watcher_id)
                .await
                .map_err(|e| TriggerFailure::external("the watcher relay", &e).at("relay.disable"))
        }
        ListenerHandle::Route(route) => {
            services.router.unregister(route);
            Ok(())
        }
    }
}
