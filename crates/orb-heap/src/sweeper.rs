use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::heap::HeapManager;

/// Handle to a running background sweep task.
///
/// Dropping the handle also stops the task, at its next wake-up.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the task and wait for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl HeapManager {
    /// Run [`evict_sweep`](HeapManager::evict_sweep) every
    /// `sweep_interval` on the current tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the heap is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let heap: Weak<HeapManager> = Arc::downgrade(self);
        let interval = self.config().sweep_interval();
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(heap) = heap.upgrade() else { break };
                        heap.evict_sweep().await;
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("heap sweeper stopped");
        });

        SweeperHandle { stop, task }
    }
}
