//! Per-job progress channel.
//!
//! A publish/subscribe broadcaster keyed by job id. Publishing delivers
//! to every currently registered observer, in order, and buffers nothing
//! for latecomers: an observer that subscribes after an event was
//! published never sees it. Callers that need the current state fetch it
//! through a status query before subscribing.

use crate::event::PipelineEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

struct Observer {
    id: ObserverId,
    tx: UnboundedSender<PipelineEvent>,
}

/// Broadcast channel for job progress events.
#[derive(Default)]
pub struct ProgressChannel {
    observers: Mutex<HashMap<String, Vec<Observer>>>,
    next_id: AtomicU64,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for a job id.
    pub fn subscribe(&self, job_id: &str) -> (ObserverId, UnboundedReceiver<PipelineEvent>) {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut observers = self.observers.lock().unwrap();
        observers
            .entry(job_id.to_string())
            .or_default()
            .push(Observer { id, tx });

        tracing::debug!("Observer {:?} subscribed to job '{}'", id, job_id);
        (id, rx)
    }

    /// Remove one observer; the job's observer set is pruned when empty.
    pub fn unsubscribe(&self, job_id: &str, observer_id: ObserverId) {
        let mut observers = self.observers.lock().unwrap();
        if let Some(set) = observers.get_mut(job_id) {
            set.retain(|o| o.id != observer_id);
            if set.is_empty() {
                observers.remove(job_id);
            }
        }
    }

    /// Deliver an event to every current observer of a job.
    ///
    /// Observers whose receiver has been dropped are pruned here. With
    /// no observers the event is dropped with a debug log — progress is
    /// best-effort by design.
    pub fn publish(&self, job_id: &str, event: PipelineEvent) {
        let mut observers = self.observers.lock().unwrap();
        match observers.get_mut(job_id) {
            Some(set) => {
                set.retain(|o| o.tx.send(event.clone()).is_ok());
                if set.is_empty() {
                    observers.remove(job_id);
                }
            }
            None => {
                tracing::debug!("No observers for job '{}', dropping event", job_id);
            }
        }
    }

    /// Number of live observers for a job.
    pub fn observer_count(&self, job_id: &str) -> usize {
        self.observers
            .lock()
            .unwrap()
            .get(job_id)
            .map_or(0, Vec::len)
    }
}
