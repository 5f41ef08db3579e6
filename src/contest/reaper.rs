use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{contest::ContestEngine, error::EngineError};

const IDLE_WAIT: Duration = Duration::from_secs(60);

/// Min-heap of session deadlines shared between the engine and the reaper.
#[derive(Default)]
pub struct DeadlineQueue {
    heap: Mutex<BinaryHeap<Reverse<(DateTime<Utc>, String)>>>,
    notify: Notify,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, session_id: &str, ends_at: DateTime<Utc>) {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Reverse((ends_at, session_id.to_string())));
        self.notify.notify_one();
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .peek()
            .map(|Reverse((at, _))| *at)
    }

    /// Removes and returns every session whose deadline is at or before `now`.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut heap = self
            .heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse((at, _))| *at <= now) {
            if let Some(Reverse((_, id))) = heap.pop() {
                due.push(id);
            }
        }
        due
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Background task that finishes sessions when their deadline passes instead
/// of waiting for the next read.
pub struct ContestReaper;

impl ContestReaper {
    pub fn spawn(engine: Arc<ContestEngine>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let deadlines = engine.deadlines();
            loop {
                let wait = deadlines
                    .next_deadline()
                    .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                    .unwrap_or(IDLE_WAIT);

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = deadlines.notify.notified() => continue,
                    _ = tokio::time::sleep(wait) => {}
                }

                let now = Utc::now();
                for session_id in deadlines.pop_due(now) {
                    match engine.expire_if_due(&session_id, now).await {
                        Ok(_) => {}
                        Err(EngineError::NotFound(_)) => {
                            tracing::debug!(session_id, "expired session already deleted");
                        }
                        Err(err) => {
                            tracing::warn!(session_id, error = %err, "failed to expire session");
                        }
                    }
                }
            }
            tracing::info!("contest reaper stopped");
        })
    }
}
