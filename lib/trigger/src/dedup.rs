//! Seen-event cache for best-effort deduplication of at-least-once delivery.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Event ids seen within the last `ttl`.
///
/// Clones share the same cache, so a sweeper task and the listener's
/// pipeline can hold one each.
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    seen: Arc<RwLock<HashMap<String, Instant>>>,
}

impl DedupCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Records `event_id` and returns true if it was not seen within the TTL.
    pub fn first_sighting(&self, event_id: &str) -> bool {
        let mut seen = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(first_seen) = seen.get(event_id) {
            if now.duration_since(*first_seen) < self.ttl {
                return false;
            }
        }
        seen.insert(event_id.to_string(), now);
        true
    }

    /// Drops every entry older than the TTL. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let mut seen = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let before = seen.len();
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.ttl);
        before - seen.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeps the cache every `interval` until `cancel` fires.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let dropped = cache.sweep();
                        trace!(dropped, remaining = cache.len(), "swept dedup cache");
                    }
                }
            }
        })
    }
}

impl Clone for DedupCache {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            seen: Arc::clone(&self.seen),
        }
    }
}
