//! Background work tracker.
//!
//! Cache writes and revalidations started while a request renders are spawned
//! as tasks and parked here; the transport settles them before it reports the
//! response as complete.

use std::sync::Mutex;
use std::time::Instant;

use metrics::histogram;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lock::mutex_lock;

pub(crate) const METRIC_BACKGROUND_SETTLE_MS: &str = "revalidator_background_settle_ms";

#[derive(Debug, Default)]
pub struct BackgroundWork {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, handle: JoinHandle<()>) {
        mutex_lock(&self.tasks, "context::background", "push").push(handle);
    }

    /// Tasks registered and not yet awaited by [`settle`](Self::settle).
    pub fn pending(&self) -> usize {
        mutex_lock(&self.tasks, "context::background", "pending").len()
    }

    /// Await every tracked task, including tasks registered while settling.
    ///
    /// A failed task never short-circuits the rest: panics are logged and the
    /// remaining tasks are still awaited.
    pub async fn settle(&self) {
        let started_at = Instant::now();
        let mut settled = 0_usize;

        loop {
            let batch = std::mem::take(&mut *mutex_lock(
                &self.tasks,
                "context::background",
                "settle",
            ));
            if batch.is_empty() {
                break;
            }

            for handle in batch {
                settled += 1;
                if let Err(err) = handle.await {
                    if err.is_panic() {
                        warn!(error = %err, "background task panicked");
                    } else {
                        debug!(error = %err, "background task cancelled");
                    }
                }
            }
        }

        if settled > 0 {
            histogram!(METRIC_BACKGROUND_SETTLE_MS)
                .record(started_at.elapsed().as_secs_f64() * 1000.0);
            debug!(settled, "background work settled");
        }
    }
}
