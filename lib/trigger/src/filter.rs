//! Chat message qualification and the per-listener event pipeline.
//!
//! A message starts a run only if the listening bot did not write it, it
//! matches the configured [`MessageMode`] (when the platform has one), and
//! its event id has not been seen recently. The pipeline debounces bursts
//! before filtering.

use crate::config::MessageMode;
use crate::context::{ListenerTarget, TriggerDetails};
use crate::debounce::debounce;
use crate::dedup::DedupCache;
use missionctl_integration::ChatMessage;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of filtering one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    OwnMessage,
    ModeMismatch,
    Duplicate,
}

/// Decides which chat messages start a run.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    mode: Option<MessageMode>,
    seen: DedupCache,
}

impl MessageFilter {
    /// A filter that applies `mode`. Without a mode every message from
    /// someone other than the bot qualifies.
    #[must_use]
    pub fn new(mode: Option<MessageMode>, seen: DedupCache) -> Self {
        Self { mode, seen }
    }

    /// Filters one message. Only accepted messages are recorded as seen.
    pub fn admit(&self, message: &ChatMessage) -> Admission {
        if message.authored_by_bot {
            return Admission::OwnMessage;
        }
        let wanted = match self.mode {
            Some(MessageMode::AllMessages) => !message.mentions_bot,
            Some(MessageMode::TaggedMessages) => message.mentions_bot,
            None => true,
        };
        if !wanted {
            return Admission::ModeMismatch;
        }
        if !self.seen.first_sighting(&message.event_id) {
            return Admission::Duplicate;
        }
        Admission::Accept
    }
}

/// Debounces, filters and fires chat messages for one listener.
///
/// Runs until `input` closes.
pub fn spawn_chat_pipeline(
    input: mpsc::Receiver<ChatMessage>,
    debounce_window: Duration,
    filter: MessageFilter,
    target: ListenerTarget,
) -> JoinHandle<()> {
    let mut messages = debounce(input, debounce_window);
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            let admission = filter.admit(&message);
            if admission != Admission::Accept {
                debug!(
                    trigger_node_id = %target.trigger_node_id,
                    event_id = %message.event_id,
                    ?admission,
                    "chat message filtered"
                );
                continue;
            }
            let details = TriggerDetails::from_chat(&message);
            match target.fire(JsonValue::String(message.text), details).await {
                Ok(()) => info!(
                    trigger_node_id = %target.trigger_node_id,
                    platform = %message.platform,
                    "chat trigger fired"
                ),
                Err(e) => warn!(
                    trigger_node_id = %target.trigger_node_id,
                    error = %e,
                    "chat trigger could not start execution"
                ),
            }
        }
        debug!(trigger_node_id = %target.trigger_node_id, "chat pipeline finished");
    })
}
