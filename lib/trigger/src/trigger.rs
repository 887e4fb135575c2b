//! The trigger contract: one entry point for every trigger kind.
//!
//! Validation never acquires anything. `start_listener` acquires, records
//! and wires shutdown; `stop_listener` is the only cancellation path. No
//! panic escapes these operations; they surface as `InternalError`.

use crate::adapters;
use crate::config::TriggerConfig;
use crate::context::{
    ExecutionBridge, ListenerStore, ListenerTarget, RawStartRequest, RawStopRequest, ResourceInfo,
    StartContext, StopContext, config_digest, parse_id,
};
use crate::error::TriggerFailure;
use crate::kind::{ConfigField, TriggerKind, TriggerMetadata};
use crate::registry::ListenerHandle;
use crate::services::TriggerServices;
use futures::FutureExt;
use missionctl_core::TriggerNodeId;
use missionctl_scheduler::ScheduleSpec;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Runs the trigger contract against shared [`TriggerServices`].
#[derive(Clone)]
pub struct TriggerRuntime {
    services: TriggerServices,
}

impl TriggerRuntime {
    #[must_use]
    pub fn new(services: TriggerServices) -> Self {
        Self { services }
    }

    #[must_use]
    pub fn services(&self) -> &TriggerServices {
        &self.services
    }

    #[must_use]
    pub fn metadata(kind: TriggerKind) -> TriggerMetadata {
        kind.metadata()
    }

    #[must_use]
    pub fn config_schema(kind: TriggerKind) -> Vec<ConfigField> {
        kind.config_schema()
    }

    /// Turns a raw start request into a typed [`StartContext`].
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for malformed ids or config.
    pub fn start_listener_validate(
        &self,
        kind: TriggerKind,
        raw: RawStartRequest,
        callback: Arc<dyn ExecutionBridge>,
        store: Arc<dyn ListenerStore>,
    ) -> Result<StartContext, TriggerFailure> {
        let validate = || -> Result<StartContext, TriggerFailure> {
            let target = ListenerTarget {
                user_id: parse_id(&raw.user_id, "userId")?,
                workflow_id: parse_id(&raw.workflow_id, "workflowId")?,
                trigger_node_id: parse_id(&raw.trigger_node_id, "triggerNodeId")?,
                callback,
            };
            let config =
                TriggerConfig::parse(kind, &raw.config, self.services.settings.reference_offset())?;
            Ok(StartContext {
                target,
                config,
                config_digest: config_digest(kind, &raw.config),
                store,
            })
        };
        validate().map_err(|e| e.at(format!("{kind}.validate")))
    }

    /// Starts the listener described by `ctx`.
    ///
    /// A listener already running for the same node is stopped first.
    ///
    /// # Errors
    ///
    /// Returns the adapter's failure; any resource acquired before the
    /// failure has been released.
    #[instrument(skip(self, ctx), fields(trigger_node_id = %ctx.trigger_node_id(), kind = %ctx.kind()))]
    pub async fn start_listener(&self, ctx: StartContext) -> Result<ResourceInfo, TriggerFailure> {
        let node = ctx.trigger_node_id();
        if let Some(previous) = ctx.store.remove_listener(&node).await {
            info!(trigger_node_id = %node, "replacing running listener");
            self.services.shutdown.unregister(&node);
            if let Err(e) = adapters::release(&self.services, &previous.handle).await {
                warn!(trigger_node_id = %node, error = %e, "failed to release replaced listener");
            }
        }
        guarded(adapters::start(&self.services, ctx), "listener start")
            .await
            .map_err(|e| e.at("trigger.start"))
    }

    /// Checks a stop request against `store` and returns the typed context.
    ///
    /// Has no side effects. For scheduled timers the echoed config, when
    /// present, decides the timer kind.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for a malformed id or when no listener is
    /// active for the node.
    pub async fn stop_listener_validate(
        &self,
        raw: RawStopRequest,
        store: &dyn ListenerStore,
    ) -> Result<StopContext, TriggerFailure> {
        let node: TriggerNodeId = parse_id(&raw.trigger_node_id, "triggerNodeId")
            .map_err(|e| e.at("trigger.stop_validate"))?;
        let Some(record) = store.find_listener(&node).await else {
            return Err(TriggerFailure::no_active_listener(&node).at("trigger.stop_validate"));
        };

        let timer_kind = match &record.handle {
            ListenerHandle::Timer(timer) => {
                let echoed = raw.config.as_ref().and_then(|config| {
                    ScheduleSpec::from_config(config, self.services.settings.reference_offset())
                        .ok()
                        .map(|spec| spec.timer_kind())
                });
                Some(echoed.unwrap_or_else(|| timer.kind()))
            }
            _ => None,
        };

        Ok(StopContext {
            trigger_node_id: node,
            kind: record.kind,
            timer_kind,
        })
    }

    /// Releases the listener for `ctx` and removes its record.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if no listener is active, or an
    /// `ExternalServiceError` if the platform-side teardown failed. The
    /// record is removed and local resources released in both cases.
    #[instrument(skip(self, ctx, store), fields(trigger_node_id = %ctx.trigger_node_id, kind = %ctx.kind))]
    pub async fn stop_listener(
        &self,
        ctx: StopContext,
        store: &dyn ListenerStore,
    ) -> Result<bool, TriggerFailure> {
        let node = ctx.trigger_node_id;
        let stop = async {
            let Some(record) = store.remove_listener(&node).await else {
                return Err(TriggerFailure::no_active_listener(&node));
            };
            self.services.shutdown.unregister(&node);
            if let (Some(echoed), ListenerHandle::Timer(timer)) = (ctx.timer_kind, &record.handle) {
                if echoed != timer.kind() {
                    warn!(trigger_node_id = %node, ?echoed, armed = ?timer.kind(), "timer kind mismatch on stop");
                }
            }
            adapters::release(&self.services, &record.handle).await?;
            info!(trigger_node_id = %node, kind = %record.kind, "listener stopped");
            Ok(true)
        };
        guarded(stop, "listener stop")
            .await
            .map_err(|e| e.at("trigger.stop"))
    }

    /// Validates and runs a stop request in one call.
    ///
    /// # Errors
    ///
    /// See [`Self::stop_listener_validate`] and [`Self::stop_listener`].
    pub async fn stop(
        &self,
        raw: RawStopRequest,
        store: &dyn ListenerStore,
    ) -> Result<bool, TriggerFailure> {
        let ctx = self.stop_listener_validate(raw, store).await?;
        self.stop_listener(ctx, store).await
    }
}

/// Runs `operation`, turning a panic into an `InternalError`.
async fn guarded<T>(
    operation: impl Future<Output = Result<T, TriggerFailure>>,
    name: &str,
) -> Result<T, TriggerFailure> {
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(operation = name, %reason, "trigger operation panicked");
            Err(TriggerFailure::internal(format!("{name} panicked: {reason}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorType, RegistryError};
    use crate::filter::tests::RecordingBridge;
    use crate::registry::{ListenerRecord, ListenerRegistry};
    use crate::settings::TriggerSettings;
    use async_trait::async_trait;
    use missionctl_core::{UserId, WorkflowId};
    use rootcause::prelude::Report;
    use serde_json::{Value as JsonValue, json};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A store that refuses every write.
    struct FailingStore;

    #[async_trait]
    impl ListenerStore for FailingStore {
        async fn store_listener(&self, _record: ListenerRecord) -> Result<(), Report<RegistryError>> {
            Err(RegistryError::StoreFailed {
                reason: "disk full".to_string(),
            }
            .into())
        }

        async fn find_listener(&self, _node: &TriggerNodeId) -> Option<ListenerRecord> {
            None
        }

        async fn remove_listener(&self, _node: &TriggerNodeId) -> Option<ListenerRecord> {
            None
        }
    }

    fn runtime_with(settings: TriggerSettings) -> TriggerRuntime {
        TriggerRuntime::new(TriggerServices::new(settings))
    }

    fn raw(config: JsonValue) -> RawStartRequest {
        RawStartRequest {
            user_id: UserId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            trigger_node_id: TriggerNodeId::new().to_string(),
            config,
        }
    }

    fn every_minute() -> JsonValue {
        json!({"schedule_type": "interval", "interval_minutes": "1"})
    }

    #[test]
    fn metadata_and_schema_cover_every_kind() {
        for kind in TriggerKind::ALL {
            assert_eq!(TriggerRuntime::metadata(kind).kind, kind);
            let _ = TriggerRuntime::config_schema(kind);
        }
    }

    #[tokio::test]
    async fn validation_failure_carries_field_and_trace() {
        let runtime = runtime_with(TriggerSettings::default());
        let err = runtime
            .start_listener_validate(
                TriggerKind::Discord,
                raw(json!({"trigger_type": "tagged_messages"})),
                Arc::new(RecordingBridge::default()),
                Arc::new(ListenerRegistry::new()),
            )
            .err()
            .unwrap();
        assert_eq!(err.error_type, ErrorType::ValidationError);
        assert_eq!(err.error_data["field"], "bot_token");
        assert_eq!(err.trace, vec!["discord.validate"]);
    }

    #[tokio::test]
    async fn stop_without_listener_is_structured_error() {
        let runtime = runtime_with(TriggerSettings::default());
        let registry = ListenerRegistry::new();
        let err = runtime
            .stop(
                RawStopRequest {
                    trigger_node_id: TriggerNodeId::new().to_string(),
                    config: None,
                },
                &registry,
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.error.contains("no active listener"));
        assert!(registry.is_empty());
        assert_eq!(runtime.services().shutdown.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_start_then_stop() {
        let runtime = runtime_with(TriggerSettings::default());
        let bridge = Arc::new(RecordingBridge::default());
        let registry = Arc::new(ListenerRegistry::new());
        let request = raw(every_minute());
        let node = request.trigger_node_id.clone();

        let ctx = runtime
            .start_listener_validate(TriggerKind::ScheduledTimer, request, bridge.clone(), registry.clone())
            .unwrap();
        let info = runtime.start_listener(ctx).await.unwrap();
        assert_eq!(info.kind, TriggerKind::ScheduledTimer);
        assert_eq!(registry.len(), 1);
        assert_eq!(runtime.services().shutdown.pending(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(bridge.count(), 1);

        let stop = RawStopRequest {
            trigger_node_id: node.clone(),
            config: Some(every_minute()),
        };
        let stop_ctx = runtime
            .stop_listener_validate(stop, registry.as_ref())
            .await
            .unwrap();
        assert_eq!(stop_ctx.timer_kind, Some(missionctl_scheduler::TimerKind::Repeating));
        assert!(runtime.stop_listener(stop_ctx, registry.as_ref()).await.unwrap());
        assert!(registry.is_empty());
        assert_eq!(runtime.services().shutdown.pending(), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(bridge.count(), 1);

        // A second stop finds nothing.
        let again = RawStopRequest {
            trigger_node_id: node,
            config: None,
        };
        assert!(runtime.stop(again, registry.as_ref()).await.unwrap_err().is_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_cancels_timer() {
        let runtime = runtime_with(TriggerSettings::default());
        let bridge = Arc::new(RecordingBridge::default());
        let ctx = runtime
            .start_listener_validate(
                TriggerKind::ScheduledTimer,
                raw(every_minute()),
                bridge.clone(),
                Arc::new(FailingStore),
            )
            .unwrap();

        let err = runtime.start_listener(ctx).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::InternalError);
        assert_eq!(err.trace, vec!["registry.store", "scheduled_timer.start", "trigger.start"]);
        assert!(err.error.contains("disk full"), "{}", err.error);
        assert!(!err.error.contains('\n'));
        assert_eq!(runtime.services().shutdown.pending(), 0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(bridge.count(), 0);
    }

    #[tokio::test]
    async fn store_failure_disables_relay_watcher() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": "sheet-1",
                "properties": {"title": "Leads"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/watchers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"watcherId": "w-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/watchers/w-1/disable"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = TriggerSettings {
            relay_base_url: server.uri(),
            ..TriggerSettings::default()
        };
        settings.endpoints.sheets_api = server.uri();
        let runtime = runtime_with(settings);

        let request = raw(json!({
            "auth_mode": "access_token",
            "access_token": "token",
            "file_id": "sheet-1"
        }));
        let node: TriggerNodeId = request.trigger_node_id.parse().unwrap();
        let workflow: WorkflowId = request.workflow_id.parse().unwrap();
        let ctx = runtime
            .start_listener_validate(
                TriggerKind::SpreadsheetChange,
                request,
                Arc::new(RecordingBridge::default()),
                Arc::new(FailingStore),
            )
            .unwrap();

        let err = runtime.start_listener(ctx).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::InternalError);
        assert!(
            !runtime
                .services()
                .router
                .contains(&crate::inbound::InboundKey::Node(workflow, node))
        );
        // Mock expectations verify the disable call when the server drops.
    }

    #[tokio::test]
    async fn sheet_start_routes_callbacks_and_stop_disables() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": "sheet-1",
                "properties": {"title": "Leads"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/watchers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"watcherId": "w-2"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/watchers/w-2/disable"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = TriggerSettings {
            relay_base_url: server.uri(),
            ..TriggerSettings::default()
        };
        settings.endpoints.sheets_api = server.uri();
        let runtime = runtime_with(settings);
        let bridge = Arc::new(RecordingBridge::default());
        let registry = Arc::new(ListenerRegistry::new());

        let request = raw(json!({
            "auth_mode": "access_token",
            "access_token": "token",
            "file_id": "sheet-1"
        }));
        let node: TriggerNodeId = request.trigger_node_id.parse().unwrap();
        let workflow: WorkflowId = request.workflow_id.parse().unwrap();
        let ctx = runtime
            .start_listener_validate(TriggerKind::SpreadsheetChange, request, bridge.clone(), registry.clone())
            .unwrap();
        let info = runtime.start_listener(ctx).await.unwrap();
        assert!(matches!(
            info.detail,
            crate::context::ResourceDetail::RelayWatcher { ref sheet_title, .. } if sheet_title == "Leads"
        ));

        let key = crate::inbound::InboundKey::Node(workflow, node);
        let elsewhere = crate::inbound::InboundKey::Node(WorkflowId::new(), node);
        assert!(
            runtime
                .services()
                .router
                .dispatch(&elsewhere, json!({"row": 4}))
                .await
                .unwrap_err()
                .is_validation()
        );
        runtime
            .services()
            .router
            .dispatch(&key, json!({"row": 4}))
            .await
            .unwrap();
        assert_eq!(bridge.count(), 1);

        let stop = RawStopRequest {
            trigger_node_id: node.to_string(),
            config: None,
        };
        assert!(runtime.stop(stop, registry.as_ref()).await.unwrap());
        assert!(!runtime.services().router.contains(&key));
    }

    #[tokio::test]
    async fn second_node_on_same_bot_leaves_owner_listening() {
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
        Mock::given(method("POST"))
            .and(path("/bot123:abc/deleteWebhook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
            .expect(0)
            .mount(&server)
            .await;

        let mut settings = TriggerSettings::default();
        settings.endpoints.telegram_api = server.uri();
        let runtime = runtime_with(settings);
        let registry = Arc::new(ListenerRegistry::new());
        let start = |runtime: &TriggerRuntime| {
            runtime
                .start_listener_validate(
                    TriggerKind::Telegram,
                    raw(json!({"access_token": "123:abc"})),
                    Arc::new(RecordingBridge::default()),
                    registry.clone(),
                )
                .unwrap()
        };

        runtime.start_listener(start(&runtime)).await.unwrap();
        let err = runtime.start_listener(start(&runtime)).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::ConflictError);
        assert_eq!(registry.len(), 1);
        assert!(
            runtime
                .services()
                .router
                .contains(&crate::inbound::InboundKey::BotToken("123:abc".to_string()))
        );
    }

    #[tokio::test]
    async fn rejected_bot_token_is_external_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut settings = TriggerSettings::default();
        settings.endpoints.discord_api = server.uri();
        let runtime = runtime_with(settings);
        let registry = Arc::new(ListenerRegistry::new());
        let ctx = runtime
            .start_listener_validate(
                TriggerKind::Discord,
                raw(json!({"bot_token": "bad", "trigger_type": "all_messages"})),
                Arc::new(RecordingBridge::default()),
                registry.clone(),
            )
            .unwrap();

        let err = runtime.start_listener(ctx).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::ExternalServiceError);
        assert_eq!(err.error_data["service"], "Discord");
        assert_eq!(err.trace, vec!["discord.start", "trigger.start"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn webhook_routes_into_workflow() {
        let runtime = runtime_with(TriggerSettings::default());
        let bridge = Arc::new(RecordingBridge::default());
        let registry = Arc::new(ListenerRegistry::new());
        let request = raw(JsonValue::Null);
        let workflow: WorkflowId = request.workflow_id.parse().unwrap();

        let ctx = runtime
            .start_listener_validate(TriggerKind::Webhook, request, bridge.clone(), registry.clone())
            .unwrap();
        runtime.start_listener(ctx).await.unwrap();

        let key = crate::inbound::InboundKey::Workflow(workflow, TriggerKind::Webhook);
        runtime
            .services()
            .router
            .dispatch(&key, json!({"order": 7}))
            .await
            .unwrap();
        let payloads = bridge.payloads.lock().unwrap();
        assert_eq!(payloads[0].data, json!({"order": 7}));
        assert_eq!(payloads[0].format, crate::context::PayloadFormat::Object);
    }

    #[tokio::test]
    async fn shutdown_releases_and_forgets_listeners() {
        let runtime = runtime_with(TriggerSettings::default());
        let registry = Arc::new(ListenerRegistry::new());
        for _ in 0..2 {
            let ctx = runtime
                .start_listener_validate(
                    TriggerKind::ChatWindow,
                    raw(JsonValue::Null),
                    Arc::new(RecordingBridge::default()),
                    registry.clone(),
                )
                .unwrap();
            runtime.start_listener(ctx).await.unwrap();
        }
        assert_eq!(registry.len(), 2);

        assert_eq!(runtime.services().shutdown.run().await, 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let exploding = async {
            if true {
                panic!("adapter exploded");
            }
            Ok::<(), TriggerFailure>(())
        };
        let err = guarded(exploding, "listener start").await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::InternalError);
        assert!(err.error.contains("adapter exploded"));
    }
}
