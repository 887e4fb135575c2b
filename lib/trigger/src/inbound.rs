//! In-memory routing of inbound webhook calls to live listeners.

use crate::error::TriggerFailure;
use crate::kind::TriggerKind;
use async_trait::async_trait;
use missionctl_core::{TriggerNodeId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Address of an inbound route.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum InboundKey {
    /// Per-node callbacks addressed by owning workflow, e.g. spreadsheet
    /// watcher notifications.
    Node(WorkflowId, TriggerNodeId),
    /// Webhook-delivered bots, keyed by their access token.
    BotToken(String),
    /// Routes addressed by workflow, e.g. the inbound webhook and chat window.
    Workflow(WorkflowId, TriggerKind),
}

impl fmt::Debug for InboundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(workflow, node) => write!(f, "Node({workflow}, {node})"),
            Self::BotToken(_) => f.write_str("BotToken(<redacted>)"),
            Self::Workflow(workflow, kind) => write!(f, "Workflow({workflow}, {kind})"),
        }
    }
}

/// Receives inbound calls for one route.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handles one inbound body.
    ///
    /// # Errors
    ///
    /// Returns a failure if the body is unusable or the run could not start.
    async fn handle(&self, body: JsonValue) -> Result<(), TriggerFailure>;
}

/// Route table shared between the listeners and the HTTP layer.
#[derive(Clone, Default)]
pub struct InboundRouter {
    routes: Arc<RwLock<HashMap<InboundKey, Arc<dyn InboundHandler>>>>,
}

impl InboundRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` at `key` unless another route already holds it.
    ///
    /// Returns false, leaving the existing route in place, if `key` is taken.
    #[must_use]
    pub fn register(&self, key: InboundKey, handler: Arc<dyn InboundHandler>) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        match routes.entry(key) {
            Entry::Occupied(entry) => {
                debug!(route = ?entry.key(), "inbound route already taken");
                false
            }
            Entry::Vacant(entry) => {
                debug!(route = ?entry.key(), "registering inbound route");
                entry.insert(handler);
                true
            }
        }
    }

    /// Removes the route at `key`. Returns true if one existed.
    pub fn unregister(&self, key: &InboundKey) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        debug!(route = ?key, "removing inbound route");
        routes.remove(key).is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &InboundKey) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Hands `body` to the route at `key`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when no listener owns the route, or the
    /// handler's own failure.
    pub async fn dispatch(&self, key: &InboundKey, body: JsonValue) -> Result<(), TriggerFailure> {
        let handler = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        let Some(handler) = handler else {
            return Err(TriggerFailure::validation(
                "No active listener for this address.",
                format!("no inbound route for {key:?}"),
            )
            .at("inbound.dispatch"));
        };
        handler.handle(body).await.map_err(|e| e.at("inbound.dispatch"))
    }
}
