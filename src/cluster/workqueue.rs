//! Keyed work queue
//!
//! A key is never handed to two workers at once. Adding a key that is being
//! processed marks it dirty, and it is queued again when the worker calls
//! `done`. Different keys are processed in parallel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct QueueState {
    /// Keys waiting for a worker, in arrival order
    pending: VecDeque<String>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    /// In-flight keys that were added again while processing
    dirty: HashSet<String>,
    /// Consecutive failed reconciles per key
    failures: HashMap<String, u32>,
}

#[derive(Clone, Default)]
pub struct WorkQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` unless it is already waiting
    pub async fn add(&self, key: &str) {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(key) {
            state.dirty.insert(key.to_string());
            return;
        }
        if state.queued.insert(key.to_string()) {
            state.pending.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue `key` after `delay`
    pub fn add_after(&self, key: &str, delay: Duration) {
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key).await;
        });
    }

    /// Wait for the next key and mark it in flight
    pub async fn next(&self) -> String {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        // Permits do not accumulate; pass the wakeup on
                        self.notify.notify_one();
                    }
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Release `key`; requeue it if it was added while in flight
    pub async fn done(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(key);
        if state.dirty.remove(key) && state.queued.insert(key.to_string()) {
            state.pending.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Record a failed reconcile and return the consecutive failure count
    pub async fn record_failure(&self, key: &str) -> u32 {
        let mut state = self.state.lock().await;
        let count = state.failures.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn forget(&self, key: &str) {
        self.state.lock().await.failures.remove(key);
    }

    /// Number of keys waiting for a worker
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
