//! Inputs and outputs of the trigger contract, and the collaborator traits
//! it consumes.

use crate::config::TriggerConfig;
use crate::error::{ExecutionError, RegistryError, TriggerFailure};
use crate::kind::TriggerKind;
use crate::registry::ListenerRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missionctl_core::{TriggerNodeId, UserId, WorkflowId};
use missionctl_integration::{ChatMessage, Platform};
use missionctl_scheduler::{ScheduleMode, TimerKind};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// Starts workflow executions. Implemented by the workflow engine.
#[async_trait]
pub trait ExecutionBridge: Send + Sync {
    /// Starts one execution for `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution could not be started.
    async fn start_execution(&self, payload: TriggerPayload) -> Result<(), Report<ExecutionError>>;
}

/// Where listeners are recorded.
#[async_trait]
pub trait ListenerStore: Send + Sync {
    /// Upserts the record for its trigger node.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored. The caller still
    /// owns the handle and must release it.
    async fn store_listener(&self, record: ListenerRecord) -> Result<(), Report<RegistryError>>;

    /// Returns the record for `node`, if any.
    async fn find_listener(&self, node: &TriggerNodeId) -> Option<ListenerRecord>;

    /// Removes and returns the record for `node`, if any.
    async fn remove_listener(&self, node: &TriggerNodeId) -> Option<ListenerRecord>;
}

/// Shape of `TriggerPayload::data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    String,
    Object,
}

/// What a downstream run needs to answer on the originating channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TriggerDetails {
    ScheduledTimer {
        fired_at: DateTime<Utc>,
        schedule_type: ScheduleMode,
    },
    Discord {
        channel_id: String,
        guild_id: Option<String>,
        message_id: String,
        author_id: String,
    },
    Slack {
        channel_id: String,
        team_id: Option<String>,
        ts: String,
        thread_ts: Option<String>,
        user_id: String,
    },
    Telegram {
        chat_id: String,
        message_id: String,
        from_id: String,
        message_thread_id: Option<String>,
    },
    Webhook {
        received_at: DateTime<Utc>,
    },
    ChatWindow {
        session_id: Option<String>,
    },
    SpreadsheetChange {
        sheet_id: String,
        watcher_id: String,
    },
}

impl TriggerDetails {
    /// Reply coordinates for a chat message.
    #[must_use]
    pub fn from_chat(message: &ChatMessage) -> Self {
        match message.platform {
            Platform::Discord => Self::Discord {
                channel_id: message.channel_id.clone(),
                guild_id: message.space_id.clone(),
                message_id: message.message_id.clone(),
                author_id: message.author_id.clone(),
            },
            Platform::Slack => Self::Slack {
                channel_id: message.channel_id.clone(),
                team_id: message.space_id.clone(),
                ts: message.message_id.clone(),
                thread_ts: message.thread_id.clone(),
                user_id: message.author_id.clone(),
            },
            Platform::Telegram => Self::Telegram {
                chat_id: message.channel_id.clone(),
                message_id: message.message_id.clone(),
                from_id: message.author_id.clone(),
                message_thread_id: message.thread_id.clone(),
            },
        }
    }
}

/// Event data handed to the execution bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    pub user_id: UserId,
    pub workflow_id: WorkflowId,
    pub trigger_node_id: TriggerNodeId,
    pub data: JsonValue,
    pub format: PayloadFormat,
    pub trigger_details: TriggerDetails,
}

/// The workflow a listener fires into, plus the callback that fires it.
#[derive(Clone)]
pub struct ListenerTarget {
    pub user_id: UserId,
    pub workflow_id: WorkflowId,
    pub trigger_node_id: TriggerNodeId,
    pub callback: Arc<dyn ExecutionBridge>,
}

impl ListenerTarget {
    /// Builds a payload from `data` and hands it to the callback.
    ///
    /// String data is sent with [`PayloadFormat::String`], anything else as an object.
    ///
    /// # Errors
    ///
    /// Returns the bridge's error.
    pub async fn fire(
        &self,
        data: JsonValue,
        trigger_details: TriggerDetails,
    ) -> Result<(), Report<ExecutionError>> {
        let format = if data.is_string() {
            PayloadFormat::String
        } else {
            PayloadFormat::Object
        };
        self.callback
            .start_execution(TriggerPayload {
                user_id: self.user_id,
                workflow_id: self.workflow_id,
                trigger_node_id: self.trigger_node_id,
                data,
                format,
                trigger_details,
            })
            .await
    }
}

/// A start request as received from the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStartRequest {
    pub user_id: String,
    pub workflow_id: String,
    pub trigger_node_id: String,
    #[serde(default)]
    pub config: JsonValue,
}

/// A validated start request.
pub struct StartContext {
    pub target: ListenerTarget,
    pub config: TriggerConfig,
    /// Fingerprint of the raw config, used to detect edits.
    pub config_digest: u64,
    pub store: Arc<dyn ListenerStore>,
}

impl StartContext {
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        self.config.kind()
    }

    #[must_use]
    pub fn trigger_node_id(&self) -> TriggerNodeId {
        self.target.trigger_node_id
    }
}

/// A stop request as received from the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStopRequest {
    pub trigger_node_id: String,
    /// The node config at stop time. For schedules it tells one-shot from repeating.
    #[serde(default)]
    pub config: Option<JsonValue>,
}

/// A validated stop request.
#[derive(Debug, Clone)]
pub struct StopContext {
    pub trigger_node_id: TriggerNodeId,
    pub kind: TriggerKind,
    /// Timer kind echoed from the stop config, for scheduled triggers.
    pub timer_kind: Option<TimerKind>,
}

/// What `start_listener` acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub trigger_node_id: TriggerNodeId,
    pub kind: TriggerKind,
    pub detail: ResourceDetail,
}

/// Kind-specific description of an acquired resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ResourceDetail {
    Timer {
        timer_kind: TimerKind,
        first_fire: DateTime<Utc>,
    },
    ChatBot {
        platform: Platform,
        bot_user_id: String,
        bot_username: String,
    },
    RelayWatcher {
        watcher_id: String,
        sheet_title: String,
        callback_url: String,
    },
    Route {
        path: String,
    },
}

/// Parses an id field of a raw request.
pub(crate) fn parse_id<T: FromStr>(raw: &str, field: &str) -> Result<T, TriggerFailure>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| {
        TriggerFailure::validation(format!("The '{field}' value is not a valid id."), e.to_string())
            .with_data("field", field)
    })
}

/// Stable fingerprint of a node's kind and raw config.
#[must_use]
pub fn config_digest(kind: TriggerKind, config: &JsonValue) -> u64 {
    let mut hasher = DefaultHasher::new();
    kind.as_str().hash(&mut hasher);
    config.to_string().hash(&mut hasher);
    hasher.finish()
}
