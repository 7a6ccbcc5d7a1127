//! Height-based timeouts for open ceremony streams
//!
//! Sessions are enqueued in the order they start. A queue must only hold
//! sessions sharing one timeout, so that expiry heights are non-decreasing
//! along it and processing a block only has to look at the head. Keygen and
//! signing have separate timeouts and therefore separate queues.

use std::collections::VecDeque;

use tokio::sync::{watch, Mutex};
use tracing::debug;

struct Entry {
    session_id: String,
    expires_at: u64,
    cancel: watch::Sender<bool>,
}

/// Receives `true` once the session's expiry height is reached
pub type TimeoutSignal = watch::Receiver<bool>;

#[derive(Default)]
pub struct TimeoutQueue {
    queue: Mutex<VecDeque<Entry>>,
}

impl TimeoutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `session_id` until `expires_at`
    pub async fn enqueue(&self, session_id: impl Into<String>, expires_at: u64) -> TimeoutSignal {
        let (cancel, signal) = watch::channel(false);
        self.queue.lock().await.push_back(Entry {
            session_id: session_id.into(),
            expires_at,
            cancel,
        });
        signal
    }

    /// Signal every session at the head of the queue that has expired by `height`
    ///
    /// Returns the IDs of the signalled sessions.
    pub async fn process(&self, height: u64) -> Vec<String> {
        let mut queue = self.queue.lock().await;
        let mut expired = Vec::new();

        while queue.front().map_or(false, |head| head.expires_at <= height) {
            if let Some(entry) = queue.pop_front() {
                // the stream may already have finished and dropped its receiver
                let _ = entry.cancel.send(true);
                debug!(session_id = %entry.session_id, height, "session timed out");
                expired.push(entry.session_id);
            }
        }

        expired
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}
