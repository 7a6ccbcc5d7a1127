//! Registry of open ceremony sessions and their one-shot outcomes

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{oneshot, RwLock};
use tracing::warn;

use crate::error::{DaemonError, Result};

enum Slot<T> {
    /// Claimed while the session is being opened
    Reserved,
    Open(T),
}

/// Concurrent map from session ID to a per-session handle
///
/// Only atomic operations are exposed: reserve, register, lookup and
/// remove. There is no iteration, so no caller can act on a stale view.
/// Reserving an ID before the slow part of opening a session makes a
/// concurrent open of the same ID fail up front.
pub struct SessionRegistry<T> {
    sessions: RwLock<HashMap<String, Slot<T>>>,
}

impl<T: Clone> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Claim `id`, failing if it is already reserved or open
    pub async fn reserve(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return Err(DaemonError::SessionExists(id.to_string()));
        }
        sessions.insert(id.to_string(), Slot::Reserved);
        Ok(())
    }

    /// Register `handle` under `id`, filling a reservation if there is one
    ///
    /// Fails if the ID is already open.
    pub async fn register(&self, id: &str, handle: T) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(Slot::Open(_)) = sessions.get(id) {
            return Err(DaemonError::SessionExists(id.to_string()));
        }
        sessions.insert(id.to_string(), Slot::Open(handle));
        Ok(())
    }

    /// Handle of an open session; reserved IDs have none yet
    pub async fn get(&self, id: &str) -> Option<T> {
        match self.sessions.read().await.get(id) {
            Some(Slot::Open(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Drop `id` whether open or only reserved
    pub async fn remove(&self, id: &str) -> Option<T> {
        match self.sessions.write().await.remove(id) {
            Some(Slot::Open(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Number of open or reserved sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl<T: Clone> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-once result slot shared by every task that may finish a session
///
/// The first [`OutcomeCell::set`] wins and is delivered to the receiver.
/// Later writers get `false` back and their value is logged and dropped.
pub struct OutcomeCell<T> {
    session_id: String,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T: std::fmt::Debug> OutcomeCell<T> {
    pub fn new(session_id: impl Into<String>) -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let cell = Self {
            session_id: session_id.into(),
            sender: Mutex::new(Some(tx)),
        };
        (cell, rx)
    }

    /// Store `value` if no outcome was stored yet
    pub fn set(&self, value: T) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(tx) => {
                if let Err(value) = tx.send(value) {
                    warn!(session_id = %self.session_id, outcome = ?value, "outcome receiver gone");
                }
                true
            }
            None => {
                warn!(session_id = %self.session_id, outcome = ?value, "dropping late session outcome");
                false
            }
        }
    }

    pub fn is_set(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}
