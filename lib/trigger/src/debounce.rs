//! Trailing-edge debounce for event streams.
//!
//! Items arriving within `window` of each other collapse to the last one,
//! which is emitted once the stream has been quiet for `window`.

use std::time::Duration;
use tokio::sync::mpsc;

/// Debounces `input` into a new receiver. The task ends, flushing any
/// pending item, when `input` closes.
pub fn debounce<T: Send + 'static>(mut input: mpsc::Receiver<T>, window: Duration) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        while let Some(first) = input.recv().await {
            let mut latest = first;
            loop {
                tokio::select! {
                    next = input.recv() => match next {
                        Some(item) => latest = item,
                        None => {
                            let _ = tx.send(latest).await;
                            return;
                        }
                    },
                    () = tokio::time::sleep(window) => break,
                }
            }
            if tx.send(latest).await.is_err() {
                return;
            }
        }
    });
    rx
}
