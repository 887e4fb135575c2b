//! Process-wide shutdown coordination.
//!
//! Every started listener registers one cleanup keyed by its trigger node.
//! On process shutdown [`ShutdownCoordinator::run`] drains the table and
//! runs every cleanup concurrently. Stopping a listener unregisters its
//! cleanup so nothing is released twice.

use futures::future::{BoxFuture, join_all};
use missionctl_core::TriggerNodeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Cleanup table shared by all adapters. Clones share state.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    cleanups: Arc<Mutex<HashMap<TriggerNodeId, Cleanup>>>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the cleanup for `node`, replacing any previous one.
    pub fn register<F, Fut>(&self, node: TriggerNodeId, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Cleanup = Box::new(move || Box::pin(cleanup()));
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node, boxed);
        debug!(trigger_node_id = %node, "registered shutdown cleanup");
    }

    /// Drops the cleanup for `node` without running it. Returns true if one existed.
    pub fn unregister(&self, node: &TriggerNodeId) -> bool {
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node)
            .is_some()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs and drains every registered cleanup. Returns how many ran.
    pub async fn run(&self) -> usize {
        let drained: Vec<(TriggerNodeId, Cleanup)> = self
            .cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let count = drained.len();
        info!(listeners = count, "releasing listeners for shutdown");
        join_all(drained.into_iter().map(|(node, cleanup)| async move {
            cleanup().await;
            debug!(trigger_node_id = %node, "listener released");
        }))
        .await;
        count
    }
}
