//! Triggers with no external resource: inbound webhooks and the chat window.
//!
//! Starting one only installs an in-memory route addressed by workflow id.

use super::Acquired;
use crate::context::{ListenerTarget, ResourceDetail, TriggerDetails};
use crate::error::TriggerFailure;
use crate::inbound::{InboundHandler, InboundKey};
use crate::kind::TriggerKind;
use crate::registry::ListenerHandle;
use crate::services::TriggerServices;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;

struct PassiveRoute {
    target: ListenerTarget,
    kind: TriggerKind,
}

impl PassiveRoute {
    /// Splits a chat-window body into message data and session id.
    fn chat_window(body: JsonValue) -> (JsonValue, Option<String>) {
        let session_id = body
            .get("sessionId")
            .and_then(JsonValue::as_str)
            .map(String::from);
        let data = match body.get("message") {
            Some(JsonValue::String(text)) => JsonValue::String(text.clone()),
            _ => body,
        };
        (data, session_id)
    }
}

#[async_trait]
impl InboundHandler for PassiveRoute {
    async fn handle(&self, body: JsonValue) -> Result<(), TriggerFailure> {
        let (data, details) = match self.kind {
            TriggerKind::ChatWindow => {
                let (data, session_id) = Self::chat_window(body);
                (data, TriggerDetails::ChatWindow { session_id })
            }
            _ => (
                body,
                TriggerDetails::Webhook {
                    received_at: Utc::now(),
                },
            ),
        };
        self.target
            .fire(data, details)
            .await
            .map_err(|e| TriggerFailure::external("the execution service", &e).at(format!("{}.route", self.kind)))
    }
}

pub(super) fn route_path(kind: TriggerKind, target: &ListenerTarget) -> String {
    match kind {
        TriggerKind::ChatWindow => format!("/chat/{}", target.workflow_id),
        _ => format!("/webhooks/workflows/{}", target.workflow_id),
    }
}

pub(super) fn start(
    services: &TriggerServices,
    target: &ListenerTarget,
    kind: TriggerKind,
) -> Result<Acquired, TriggerFailure> {
    let route = InboundKey::Workflow(target.workflow_id, kind);
    let handler = Arc::new(PassiveRoute {
        target: target.clone(),
        kind,
    });
    if !services.router.register(route.clone(), handler) {
        return Err(TriggerFailure::conflict(
            format!("This workflow already has an active {kind} trigger."),
            format!("route for workflow {} and kind {kind} is taken", target.workflow_id),
        )
        .with_data("workflowId", target.workflow_id.to_string()));
    }
    Ok(Acquired {
        handle: ListenerHandle::Route(route),
        detail: ResourceDetail::Route {
            path: route_path(kind, target),
        },
    })
}
