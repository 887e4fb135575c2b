//! Scheduled timers. The only kind with no network dependency.

use super::Acquired;
use crate::context::{ListenerTarget, ResourceDetail, TriggerDetails};
use crate::error::TriggerFailure;
use crate::registry::ListenerHandle;
use crate::services::TriggerServices;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missionctl_scheduler::{FireError, FireHandler, ScheduleMode, ScheduleSpec, arm};
use serde_json::json;
use std::sync::Arc;

struct ScheduledFire {
    target: ListenerTarget,
    mode: ScheduleMode,
}

#[async_trait]
impl FireHandler for ScheduledFire {
    async fn on_fire(&self, fired_at: DateTime<Utc>) -> Result<(), FireError> {
        let data = json!({
            "firedAt": fired_at,
            "scheduleType": self.mode,
        });
        self.target
            .fire(
                data,
                TriggerDetails::ScheduledTimer {
                    fired_at,
                    schedule_type: self.mode,
                },
            )
            .await
            .map_err(|e| FireError::new(e.to_string()))
    }
}

pub(super) fn start(
    services: &TriggerServices,
    target: &ListenerTarget,
    spec: &ScheduleSpec,
) -> Result<Acquired, TriggerFailure> {
    let handler = Arc::new(ScheduledFire {
        target: target.clone(),
        mode: spec.mode(),
    });
    let timer = arm(spec.clone(), services.settings.reference_offset(), handler)?;
    Ok(Acquired {
        detail: ResourceDetail::Timer {
            timer_kind: timer.kind(),
            first_fire: timer.first_fire(),
        },
        handle: ListenerHandle::Timer(timer),
    })
}
