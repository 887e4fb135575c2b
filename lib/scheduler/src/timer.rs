//! Timers that fire a handler on a schedule and re-arm until cancelled.
//!
//! A timer runs as one tokio task. Handler failures and panics are logged
//! and never end the re-arm cycle; only [`TimerHandle::cancel`] does. A fire
//! that is already in flight when the timer is cancelled still completes.

use crate::error::{FireError, ScheduleError};
use crate::recurrence::{NextFire, Rearm, next_fire};
use crate::schedule::ScheduleSpec;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Whether a timer fires once per arming or on a fixed period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Armed for a single fire, then re-armed from the spec (or dropped).
    OneShot,
    /// A periodic timer.
    Repeating,
}

/// Receives timer fires.
#[async_trait]
pub trait FireHandler: Send + Sync + 'static {
    /// Called once per fire with the wall-clock fire time.
    async fn on_fire(&self, fired_at: DateTime<Utc>) -> Result<(), FireError>;
}

/// Handle to an armed timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    kind: TimerKind,
    first_fire: DateTime<Utc>,
    cancel: CancellationToken,
}

impl TimerHandle {
    /// Returns the timer kind.
    #[must_use]
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Returns when the timer first fires.
    #[must_use]
    pub fn first_fire(&self) -> DateTime<Utc> {
        self.first_fire
    }

    /// Stops the timer. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns whether the timer has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Arms a timer for `spec`, computing the first fire from the current time.
///
/// # Errors
///
/// Returns an error if the first fire cannot be computed; nothing is spawned
/// in that case.
pub fn arm(
    spec: ScheduleSpec,
    reference: FixedOffset,
    handler: Arc<dyn FireHandler>,
) -> Result<TimerHandle, ScheduleError> {
    let first = next_fire(&spec, Utc::now(), reference)?;
    let handle = TimerHandle {
        kind: spec.timer_kind(),
        first_fire: first.at,
        cancel: CancellationToken::new(),
    };

    info!(
        mode = %spec.mode(),
        first_fire = %first.at,
        delay_ms = first.delay.as_millis() as u64,
        "arming schedule timer"
    );

    let cancel = handle.cancel.clone();
    tokio::spawn(async move {
        match spec.rearm() {
            Rearm::Every(period) => run_periodic(first, period, handler, cancel).await,
            Rearm::Never => run_once(first, handler, cancel).await,
            Rearm::Recompute => run_recomputing(spec, reference, first, handler, cancel).await,
        }
        debug!("schedule timer finished");
    });

    Ok(handle)
}

async fn run_periodic(
    first: NextFire,
    period: std::time::Duration,
    handler: Arc<dyn FireHandler>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + first.delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => dispatch(&handler).await,
        }
    }
}

async fn run_once(first: NextFire, handler: Arc<dyn FireHandler>, cancel: CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(first.delay) => dispatch(&handler).await,
    }
}

async fn run_recomputing(
    spec: ScheduleSpec,
    reference: FixedOffset,
    first: NextFire,
    handler: Arc<dyn FireHandler>,
    cancel: CancellationToken,
) {
    let mut current = first;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(current.delay) => dispatch(&handler).await,
        }
        if cancel.is_cancelled() {
            return;
        }
        // Never compute from before the target that just fired.
        let now = Utc::now().max(current.at);
        match next_fire(&spec, now, reference) {
            Ok(next) => {
                debug!(next_fire = %next.at, "re-armed schedule timer");
                current = next;
            }
            Err(e) => {
                error!(error = %e, "failed to re-arm schedule timer");
                return;
            }
        }
    }
}

/// Runs one fire on its own task so a panicking handler is contained.
async fn dispatch(handler: &Arc<dyn FireHandler>) {
    let handler = Arc::clone(handler);
    let fired_at = Utc::now();
    match tokio::spawn(async move { handler.on_fire(fired_at).await }).await {
        Ok(Ok(())) => debug!(%fired_at, "schedule fired"),
        Ok(Err(e)) => warn!(error = %e, %fired_at, "schedule fire handler failed"),
        Err(e) => error!(error = %e, %fired_at, "schedule fire handler panicked"),
    }
}
