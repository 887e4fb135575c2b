//! Spreadsheet change listeners backed by a relay-hosted watcher.

use super::Acquired;
use crate::config::SpreadsheetConfig;
use crate::context::{ListenerTarget, ResourceDetail, TriggerDetails};
use crate::error::TriggerFailure;
use crate::inbound::{InboundHandler, InboundKey};
use crate::registry::ListenerHandle;
use crate::services::TriggerServices;
use async_trait::async_trait;
use missionctl_integration::{WatchRequest, WatcherId};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

struct ChangeRoute {
    target: ListenerTarget,
    sheet_id: String,
    watcher_id: WatcherId,
}

#[async_trait]
impl InboundHandler for ChangeRoute {
    async fn handle(&self, body: JsonValue) -> Result<(), TriggerFailure> {
        let details = TriggerDetails::SpreadsheetChange {
            sheet_id: self.sheet_id.clone(),
            watcher_id: self.watcher_id.to_string(),
        };
        self.target
            .fire(body, details)
            .await
            .map_err(|e| TriggerFailure::external("the execution service", &e).at("sheets.route"))
    }
}

pub(super) async fn start(
    services: &TriggerServices,
    target: &ListenerTarget,
    config: &SpreadsheetConfig,
) -> Result<Acquired, TriggerFailure> {
    let mut credentials = config.credentials.clone();
    let sheet = services
        .sheets
        .verify_access(&config.file_id, &mut credentials)
        .await
        .map_err(|e| TriggerFailure::external("Google Sheets", &e).with_data("field", "file_id"))?;

    let callback_url = services.settings.public_url(&format!(
        "/webhooks/sheets/{}/{}",
        target.workflow_id, target.trigger_node_id
    ));
    let watcher_id = services
        .relay
        .register_watcher(&WatchRequest {
            sheet_id: &config.file_id,
            callback_url: &callback_url,
            access_token: &credentials.access_token,
        })
        .await
        .map_err(|e| TriggerFailure::external("the watcher relay", &e))?;
    info!(trigger_node_id = %target.trigger_node_id, %watcher_id, "spreadsheet watcher registered");

    let route = InboundKey::Node(target.workflow_id, target.trigger_node_id);
    let handler = Arc::new(ChangeRoute {
        target: target.clone(),
        sheet_id: config.file_id.clone(),
        watcher_id: watcher_id.clone(),
    });
    if !services.router.register(route.clone(), handler) {
        if let Err(e) = services.relay.disable_watcher(&watcher_id).await {
            warn!(%watcher_id, error = %e, "failed to disable unused watcher");
        }
        return Err(TriggerFailure::conflict(
            "This trigger is already watching a spreadsheet.",
            format!("callback route for node {} is taken", target.trigger_node_id),
        ));
    }

    Ok(Acquired {
        detail: ResourceDetail::RelayWatcher {
            watcher_id: watcher_id.to_string(),
            sheet_title: sheet.title,
            callback_url,
        },
        handle: ListenerHandle::RelayWatcher { watcher_id, route },
    })
}
