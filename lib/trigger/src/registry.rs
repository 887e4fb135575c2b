//! Process-wide record of active listeners.
//!
//! Records live in an arena of slots with two indexes: by trigger node id
//! and by unique key. At most one record exists per node, and a unique key
//! is held by at most one node.

use crate::config::{Secret, UniqueKey};
use crate::context::ListenerStore;
use crate::error::RegistryError;
use crate::inbound::InboundKey;
use crate::kind::TriggerKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missionctl_core::{TriggerNodeId, WorkflowId};
use missionctl_integration::{Platform, WatcherId};
use missionctl_scheduler::TimerHandle;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// Reference to a live listener resource.
#[derive(Debug, Clone)]
pub enum ListenerHandle {
    /// A scheduled timer.
    Timer(TimerHandle),
    /// A socket session; cancelling it closes the connection.
    Socket {
        platform: Platform,
        cancel: CancellationToken,
    },
    /// A webhook-delivered bot and its inbound route.
    TelegramWebhook {
        access_token: Secret,
        route: InboundKey,
        cancel: CancellationToken,
    },
    /// A relay-hosted watcher and its callback route.
    RelayWatcher {
        watcher_id: WatcherId,
        route: InboundKey,
    },
    /// An in-memory route with no external resource.
    Route(InboundKey),
}

/// An active listener.
#[derive(Debug, Clone)]
pub struct ListenerRecord {
    pub trigger_node_id: TriggerNodeId,
    pub workflow_id: WorkflowId,
    pub kind: TriggerKind,
    pub unique_key: UniqueKey,
    pub handle: ListenerHandle,
    pub config_digest: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Option<ListenerRecord>>,
    free: Vec<usize>,
    by_node: HashMap<TriggerNodeId, usize>,
    by_key: HashMap<UniqueKey, usize>,
}

impl Arena {
    fn record(&self, slot: usize) -> Option<&ListenerRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn insert(&mut self, record: ListenerRecord) -> Result<Option<ListenerRecord>, RegistryError> {
        if let Some(&slot) = self.by_key.get(&record.unique_key) {
            if let Some(holder) = self.record(slot) {
                if holder.trigger_node_id != record.trigger_node_id {
                    return Err(RegistryError::KeyInUse {
                        owner: holder.trigger_node_id,
                    });
                }
            }
        }

        if let Some(&slot) = self.by_node.get(&record.trigger_node_id) {
            let previous = self.slots[slot].replace(record.clone());
            if let Some(previous) = &previous {
                if previous.unique_key != record.unique_key {
                    self.by_key.remove(&previous.unique_key);
                }
            }
            self.by_key.insert(record.unique_key, slot);
            return Ok(previous);
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.by_node.insert(record.trigger_node_id, slot);
        self.by_key.insert(record.unique_key.clone(), slot);
        self.slots[slot] = Some(record);
        Ok(None)
    }

    fn take(&mut self, node: &TriggerNodeId) -> Option<ListenerRecord> {
        let slot = self.by_node.remove(node)?;
        let record = self.slots.get_mut(slot)?.take()?;
        self.by_key.remove(&record.unique_key);
        self.free.push(slot);
        Some(record)
    }
}

/// In-memory listener registry. Clones share state.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    arena: Arc<RwLock<Arena>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts `record`, returning the record it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::KeyInUse`] if another node holds the record's unique key.
    pub fn insert(&self, record: ListenerRecord) -> Result<Option<ListenerRecord>, RegistryError> {
        self.arena
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record)
    }

    /// Returns a copy of the record for `node`.
    #[must_use]
    pub fn get(&self, node: &TriggerNodeId) -> Option<ListenerRecord> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        let slot = *arena.by_node.get(node)?;
        arena.record(slot).cloned()
    }

    /// Removes and returns the record for `node`.
    pub fn take(&self, node: &TriggerNodeId) -> Option<ListenerRecord> {
        self.arena
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take(node)
    }

    /// Returns the workflow and node holding `key`.
    #[must_use]
    pub fn owner_of_key(&self, key: &UniqueKey) -> Option<(WorkflowId, TriggerNodeId)> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        let slot = *arena.by_key.get(key)?;
        arena
            .record(slot)
            .map(|record| (record.workflow_id, record.trigger_node_id))
    }

    /// Returns copies of every record owned by `workflow`.
    #[must_use]
    pub fn records_for_workflow(&self, workflow: &WorkflowId) -> Vec<ListenerRecord> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = arena
            .slots
            .iter()
            .flatten()
            .filter(|record| record.workflow_id == *workflow)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.started_at);
        records
    }

    /// Returns the ids of every active listener.
    #[must_use]
    pub fn node_ids(&self) -> Vec<TriggerNodeId> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        arena.by_node.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arena
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_node
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ListenerStore for ListenerRegistry {
    async fn store_listener(&self, record: ListenerRecord) -> Result<(), Report<RegistryError>> {
        self.insert(record)?;
        Ok(())
    }

    async fn find_listener(&self, node: &TriggerNodeId) -> Option<ListenerRecord> {
        self.get(node)
    }

    async fn remove_listener(&self, node: &TriggerNodeId) -> Option<ListenerRecord> {
        self.take(node)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use serde_json::json;

    pub(crate) fn route_record(workflow: WorkflowId, node: TriggerNodeId) -> ListenerRecord {
        ListenerRecord {
            trigger_node_id: node,
            workflow_id: workflow,
            kind: TriggerKind::Webhook,
            unique_key: TriggerConfig::Webhook.unique_key(&node),
            handle: ListenerHandle::Route(InboundKey::Workflow(workflow, TriggerKind::Webhook)),
            config_digest: 0,
            started_at: Utc::now(),
        }
    }

    fn discord_record(workflow: WorkflowId, node: TriggerNodeId, token: &str) -> ListenerRecord {
        let config = TriggerConfig::parse(
            TriggerKind::Discord,
            &json!({"bot_token": token, "trigger_type": "all_messages"}),
            chrono::FixedOffset::east_opt(0).unwrap(),
        )
        .unwrap();
        ListenerRecord {
            kind: TriggerKind::Discord,
            unique_key: config.unique_key(&node),
            handle: ListenerHandle::Socket {
                platform: Platform::Discord,
                cancel: CancellationToken::new(),
            },
            ..route_record(workflow, node)
        }
    }

    #[test]
    fn insert_get_take() {
        let registry = ListenerRegistry::new();
        let workflow = WorkflowId::new();
        let node = TriggerNodeId::new();

        assert!(registry.insert(route_record(workflow, node)).unwrap().is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&node).unwrap().workflow_id, workflow);

        let taken = registry.take(&node).unwrap();
        assert_eq!(taken.trigger_node_id, node);
        assert!(registry.is_empty());
        assert!(registry.take(&node).is_none());
    }

    #[test]
    fn upsert_replaces_same_node() {
        let registry = ListenerRegistry::new();
        let workflow = WorkflowId::new();
        let node = TriggerNodeId::new();

        registry.insert(discord_record(workflow, node, "old")).unwrap();
        let replaced = registry.insert(discord_record(workflow, node, "new")).unwrap();
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);

        let old_key = discord_record(workflow, node, "old").unique_key;
        assert!(registry.owner_of_key(&old_key).is_none());
    }

    #[test]
    fn unique_key_held_by_one_node() {
        let registry = ListenerRegistry::new();
        let first = TriggerNodeId::new();
        let owner_workflow = WorkflowId::new();
        registry
            .insert(discord_record(owner_workflow, first, "shared"))
            .unwrap();

        let err = registry
            .insert(discord_record(WorkflowId::new(), TriggerNodeId::new(), "shared"))
            .unwrap_err();
        assert_eq!(err, RegistryError::KeyInUse { owner: first });

        let key = discord_record(owner_workflow, first, "shared").unique_key;
        assert_eq!(registry.owner_of_key(&key), Some((owner_workflow, first)));
    }

    #[test]
    fn slots_are_reused() {
        let registry = ListenerRegistry::new();
        let workflow = WorkflowId::new();
        let a = TriggerNodeId::new();
        let b = TriggerNodeId::new();

        registry.insert(route_record(workflow, a)).unwrap();
        registry.take(&a);
        registry.insert(route_record(workflow, b)).unwrap();

        let arena = registry.arena.read().unwrap();
        assert_eq!(arena.slots.len(), 1);
    }

    #[test]
    fn records_for_workflow_filters_owner() {
        let registry = ListenerRegistry::new();
        let mine = WorkflowId::new();
        let theirs = WorkflowId::new();
        registry.insert(route_record(mine, TriggerNodeId::new())).unwrap();
        registry.insert(route_record(mine, TriggerNodeId::new())).unwrap();
        registry.insert(route_record(theirs, TriggerNodeId::new())).unwrap();

        assert_eq!(registry.records_for_workflow(&mine).len(), 2);
        assert_eq!(registry.records_for_workflow(&theirs).len(), 1);
        assert_eq!(registry.node_ids().len(), 3);
    }

    #[tokio::test]
    async fn store_trait_reports_conflicts() {
        let registry = ListenerRegistry::new();
        registry
            .store_listener(discord_record(WorkflowId::new(), TriggerNodeId::new(), "t"))
            .await
            .unwrap();
        let result = registry
            .store_listener(discord_record(WorkflowId::new(), TriggerNodeId::new(), "t"))
            .await;
        assert!(result.is_err());
    }
}
