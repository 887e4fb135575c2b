//! Reference orchestrator: keeps a workflow's running listeners in step with
//! its trigger nodes.
//!
//! Reconciliation diffs the desired nodes against the registry by config
//! digest, stops removed and changed listeners, then starts added and
//! changed ones. A node whose external identity is held by another listener
//! is rejected with a `ConflictError` before its adapter runs.

use crate::context::{ExecutionBridge, RawStartRequest, ResourceInfo, StopContext};
use crate::error::TriggerFailure;
use crate::kind::TriggerKind;
use crate::registry::{ListenerHandle, ListenerRegistry};
use crate::trigger::TriggerRuntime;
use missionctl_core::{TriggerNodeId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// A trigger node as defined in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerNode {
    pub id: TriggerNodeId,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub config: JsonValue,
}

/// A node the supervisor could not start or stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailure {
    pub trigger_node_id: TriggerNodeId,
    pub failure: TriggerFailure,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub started: Vec<ResourceInfo>,
    pub stopped: Vec<TriggerNodeId>,
    pub failed: Vec<NodeFailure>,
}

impl ReconcileReport {
    fn fail(&mut self, trigger_node_id: TriggerNodeId, failure: TriggerFailure) {
        warn!(%trigger_node_id, error = %failure, trace = ?failure.trace, "trigger node failed");
        self.failed.push(NodeFailure {
            trigger_node_id,
            failure,
        });
    }
}

/// Owns the listener registry and drives the trigger runtime for workflows.
pub struct ListenerSupervisor {
    runtime: TriggerRuntime,
    registry: ListenerRegistry,
    callback: Arc<dyn ExecutionBridge>,
    reconciling: Mutex<()>,
}

impl ListenerSupervisor {
    #[must_use]
    pub fn new(runtime: TriggerRuntime, callback: Arc<dyn ExecutionBridge>) -> Self {
        Self {
            runtime,
            registry: ListenerRegistry::new(),
            callback,
            reconciling: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &TriggerRuntime {
        &self.runtime
    }

    #[must_use]
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Brings `workflow`'s listeners in line with `nodes`.
    ///
    /// Per-node failures are collected in the report; they never abort the
    /// rest of the reconciliation.
    #[instrument(skip(self, nodes), fields(nodes = nodes.len()))]
    pub async fn reconcile(
        &self,
        user: UserId,
        workflow: WorkflowId,
        nodes: Vec<TriggerNode>,
    ) -> ReconcileReport {
        let _guard = self.reconciling.lock().await;
        let mut report = ReconcileReport::default();

        let running: HashMap<TriggerNodeId, u64> = self
            .registry
            .records_for_workflow(&workflow)
            .into_iter()
            .map(|record| (record.trigger_node_id, record.config_digest))
            .collect();
        let desired: Vec<(TriggerNode, u64)> = nodes
            .into_iter()
            .map(|node| {
                let digest = crate::context::config_digest(node.kind, &node.config);
                (node, digest)
            })
            .collect();
        let wanted: HashMap<TriggerNodeId, u64> =
            desired.iter().map(|(node, digest)| (node.id, *digest)).collect();

        for (node, digest) in &running {
            if wanted.get(node) != Some(digest) {
                self.stop_node(*node, &mut report).await;
            }
        }

        for (node, digest) in desired {
            if running.get(&node.id) == Some(&digest) {
                continue;
            }
            self.start_node(user, workflow, node, &mut report).await;
        }

        info!(
            started = report.started.len(),
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "reconciled workflow triggers"
        );
        report
    }

    /// Stops every listener of `workflow`.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, workflow: WorkflowId) -> ReconcileReport {
        let _guard = self.reconciling.lock().await;
        let mut report = ReconcileReport::default();
        for record in self.registry.records_for_workflow(&workflow) {
            self.stop_node(record.trigger_node_id, &mut report).await;
        }
        report
    }

    /// Releases every listener in the process.
    pub async fn shutdown(&self) -> usize {
        self.runtime.services().shutdown.run().await
    }

    async fn stop_node(&self, node: TriggerNodeId, report: &mut ReconcileReport) {
        let Some(record) = self.registry.get(&node) else {
            return;
        };
        let timer_kind = match &record.handle {
            ListenerHandle::Timer(timer) => Some(timer.kind()),
            _ => None,
        };
        let ctx = StopContext {
            trigger_node_id: node,
            kind: record.kind,
            timer_kind,
        };
        match self.runtime.stop_listener(ctx, &self.registry).await {
            Ok(_) => report.stopped.push(node),
            Err(failure) => {
                // The record is gone either way; only the remote teardown failed.
                report.stopped.push(node);
                report.fail(node, failure.at("supervisor.stop"));
            }
        }
    }

    async fn start_node(
        &self,
        user: UserId,
        workflow: WorkflowId,
        node: TriggerNode,
        report: &mut ReconcileReport,
    ) {
        let raw = RawStartRequest {
            user_id: user.to_string(),
            workflow_id: workflow.to_string(),
            trigger_node_id: node.id.to_string(),
            config: node.config,
        };
        let store = Arc::new(self.registry.clone());
        let ctx = match self.runtime.start_listener_validate(
            node.kind,
            raw,
            Arc::clone(&self.callback),
            store,
        ) {
            Ok(ctx) => ctx,
            Err(failure) => {
                report.fail(node.id, failure.at("supervisor.start"));
                return;
            }
        };

        let key = ctx.config.unique_key(&node.id);
        if let Some((owner_workflow, owner_node)) = self.registry.owner_of_key(&key) {
            if owner_node != node.id {
                let failure = TriggerFailure::conflict(
                    format!("These {} credentials are already used by another active workflow.", node.kind),
                    format!("listener identity held by node {owner_node} of workflow {owner_workflow}"),
                )
                .with_data("ownerWorkflowId", owner_workflow.to_string())
                .with_data("ownerTriggerNodeId", owner_node.to_string())
                .at("supervisor.start");
                report.fail(node.id, failure);
                return;
            }
        }

        match self.runtime.start_listener(ctx).await {
            Ok(info) => report.started.push(info),
            Err(failure) => report.fail(node.id, failure.at("supervisor.start")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::filter::tests::RecordingBridge;
    use crate::services::TriggerServices;
    use crate::settings::TriggerSettings;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supervisor(settings: TriggerSettings) -> (ListenerSupervisor, Arc<RecordingBridge>) {
        let bridge = Arc::new(RecordingBridge::default());
        let runtime = TriggerRuntime::new(TriggerServices::new(settings));
        (ListenerSupervisor::new(runtime, bridge.clone()), bridge)
    }

    fn timer_node(minutes: u32) -> TriggerNode {
        TriggerNode {
            id: TriggerNodeId::new(),
            kind: TriggerKind::ScheduledTimer,
            config: json!({"schedule_type": "interval", "interval_minutes": minutes}),
        }
    }

    #[tokio::test]
    async fn reconcile_starts_stops_and_restarts_changed() {
        let (supervisor, _) = supervisor(TriggerSettings::default());
        let user = UserId::new();
        let workflow = WorkflowId::new();
        let keep = timer_node(5);
        let mut change = timer_node(10);
        let remove = TriggerNode {
            id: TriggerNodeId::new(),
            kind: TriggerKind::Webhook,
            config: JsonValue::Null,
        };

        let report = supervisor
            .reconcile(user, workflow, vec![keep.clone(), change.clone(), remove.clone()])
            .await;
        assert_eq!(report.started.len(), 3);
        assert!(report.failed.is_empty());

        change.config = json!({"schedule_type": "interval", "interval_minutes": 15});
        let report = supervisor
            .reconcile(user, workflow, vec![keep.clone(), change.clone()])
            .await;
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.started[0].trigger_node_id, change.id);
        assert_eq!(report.stopped.len(), 2);
        assert!(report.stopped.contains(&remove.id));
        assert!(report.stopped.contains(&change.id));
        assert_eq!(supervisor.registry().len(), 2);

        let report = supervisor.reconcile(user, workflow, vec![keep, change]).await;
        assert_eq!(report, ReconcileReport::default());
    }

    #[tokio::test]
    async fn shared_identity_conflicts_across_workflows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 42, "is_bot": true, "first_name": "Mission", "username": "mission_bot"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/setWebhook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = TriggerSettings::default();
        settings.endpoints.telegram_api = server.uri();
        let (supervisor, _) = supervisor(settings);
        let owner = WorkflowId::new();
        let node = |id| TriggerNode {
            id,
            kind: TriggerKind::Telegram,
            config: json!({"access_token": "123:abc"}),
        };

        let first = TriggerNodeId::new();
        let report = supervisor.reconcile(UserId::new(), owner, vec![node(first)]).await;
        assert_eq!(report.started.len(), 1);

        let report = supervisor
            .reconcile(UserId::new(), WorkflowId::new(), vec![node(TriggerNodeId::new())])
            .await;
        assert!(report.started.is_empty());
        let failure = &report.failed[0].failure;
        assert_eq!(failure.error_type, ErrorType::ConflictError);
        assert_eq!(failure.error_data["ownerWorkflowId"], owner.to_string());
        assert_eq!(supervisor.registry().len(), 1);
    }

    #[tokio::test]
    async fn invalid_node_is_reported_not_fatal() {
        let (supervisor, _) = supervisor(TriggerSettings::default());
        let bad = TriggerNode {
            id: TriggerNodeId::new(),
            kind: TriggerKind::ScheduledTimer,
            config: json!({"schedule_type": "fortnightly"}),
        };
        let good = timer_node(1);
        let report = supervisor
            .reconcile(UserId::new(), WorkflowId::new(), vec![bad.clone(), good])
            .await;
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].trigger_node_id, bad.id);
        assert!(report.failed[0].failure.is_validation());
    }

    #[tokio::test]
    async fn deactivate_and_shutdown_release_everything() {
        let (supervisor, _) = supervisor(TriggerSettings::default());
        let workflow = WorkflowId::new();
        let other = WorkflowId::new();
        supervisor
            .reconcile(UserId::new(), workflow, vec![timer_node(1), timer_node(2)])
            .await;
        supervisor.reconcile(UserId::new(), other, vec![timer_node(3)]).await;

        let report = supervisor.deactivate(workflow).await;
        assert_eq!(report.stopped.len(), 2);
        assert_eq!(supervisor.registry().len(), 1);

        assert_eq!(supervisor.shutdown().await, 1);
        assert!(supervisor.registry().is_empty());
    }
}
