//! Event bus between the ledger subscription and the ceremony coordinators
//!
//! One feed task reads committed blocks from the ledger and publishes them.
//! Each coordinator owns a [`Subscription`] with its own event filter and
//! runs one dispatch loop over it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, warn};

use quorum_core::Event;

use crate::error::{DaemonError, Result};
use crate::ledger::{BlockEvents, Ledger};
use crate::stream::{CeremonyKind, StreamingManager};
use crate::unary::UnaryManager;

/// Selects the events a subscriber cares about
pub type EventFilter = fn(&Event) -> bool;

/// Keygen and signing starts
pub fn ceremony_starts(event: &Event) -> bool {
    matches!(
        event,
        Event::KeygenStarted { .. } | Event::SigningStarted { .. }
    )
}

/// Ceremony starts plus relayed protocol traffic
pub fn streamed_ceremonies(event: &Event) -> bool {
    ceremony_starts(event)
        || matches!(
            event,
            Event::KeygenTraffic { .. } | Event::SignTraffic { .. }
        )
}

/// What a subscriber receives, in block order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A new block was committed; sent before the block's events
    NewBlock(u64),
    Event(Event),
}

pub struct EventBus {
    sender: broadcast::Sender<Arc<BlockEvents>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription {
            blocks: self.sender.subscribe(),
            filter,
            pending: VecDeque::new(),
        }
    }

    /// Returns the number of subscribers the block reached
    pub fn publish(&self, block: BlockEvents) -> usize {
        self.sender.send(Arc::new(block)).unwrap_or(0)
    }
}

pub struct Subscription {
    blocks: broadcast::Receiver<Arc<BlockEvents>>,
    filter: EventFilter,
    pending: VecDeque<Delivery>,
}

impl Subscription {
    /// Next delivery, or `None` once the bus is closed
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.pending.pop_front() {
                return Some(delivery);
            }

            match self.blocks.recv().await {
                Ok(block) => {
                    self.pending.push_back(Delivery::NewBlock(block.height));
                    let filter = self.filter;
                    self.pending.extend(
                        block
                            .events
                            .iter()
                            .filter(|event| filter(event))
                            .cloned()
                            .map(Delivery::Event),
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagging, blocks dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Counters shared between the dispatch loops and the health socket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub last_height: Option<u64>,
    pub blocks_seen: u64,
    pub open_keygen_sessions: usize,
    pub open_sign_sessions: usize,
    pub sessions_finished: u64,
    pub sessions_aborted: u64,
}

#[derive(Clone, Default)]
pub struct StatusHandle {
    counters: Arc<RwLock<DaemonStatus>>,
    streams: Option<Arc<StreamingManager>>,
}

impl StatusHandle {
    pub fn new(streams: Option<Arc<StreamingManager>>) -> Self {
        Self {
            counters: Arc::default(),
            streams,
        }
    }

    pub async fn snapshot(&self) -> DaemonStatus {
        let mut status = self.counters.read().await.clone();
        if let Some(streams) = &self.streams {
            status.open_keygen_sessions = streams.open_sessions(CeremonyKind::Keygen).await;
            status.open_sign_sessions = streams.open_sessions(CeremonyKind::Sign).await;
        }
        status
    }

    async fn observe_block(&self, height: u64) {
        let mut counters = self.counters.write().await;
        counters.last_height = Some(height);
        counters.blocks_seen += 1;
    }

    async fn record_outcome(&self, ok: bool) {
        let mut counters = self.counters.write().await;
        if ok {
            counters.sessions_finished += 1;
        } else {
            counters.sessions_aborted += 1;
        }
    }
}

/// Pump ledger blocks onto the bus
///
/// Fails with [`DaemonError::Stalled`] when no block arrives within
/// `watchdog`. The bus is dropped on return, which ends every subscription.
pub async fn run_feed(
    ledger: Arc<dyn Ledger>,
    bus: EventBus,
    status: StatusHandle,
    watchdog: Duration,
) -> Result<()> {
    let mut blocks = ledger.subscribe().await?;

    loop {
        let block = match tokio::time::timeout(watchdog, blocks.recv()).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                return Err(DaemonError::Ipc("ledger subscription closed".to_string()));
            }
            Err(_) => {
                error!(?watchdog, "no new block, closing event bus");
                return Err(DaemonError::Stalled);
            }
        };

        debug!(height = block.height, events = block.events.len(), "new block");
        status.observe_block(block.height).await;
        bus.publish(block);
    }
}

/// Dispatch loop for the unary coordinator
///
/// Every ceremony runs in its own task so a slow backend call does not hold
/// up other sessions.
pub async fn run_unary(manager: Arc<UnaryManager>, mut subscription: Subscription, status: StatusHandle) {
    while let Some(delivery) = subscription.next().await {
        let event = match delivery {
            Delivery::Event(event) => event,
            Delivery::NewBlock(_) => continue,
        };

        let manager = Arc::clone(&manager);
        let status = status.clone();
        tokio::spawn(async move {
            match manager.handle_event(&event).await {
                Ok(()) => status.record_outcome(true).await,
                Err(e) => {
                    warn!(event = event.kind(), error = %e, "ceremony contribution aborted");
                    status.record_outcome(false).await;
                }
            }
        });
    }
    debug!("unary dispatch loop stopped");
}

/// Dispatch loop for the streaming coordinator
///
/// Events are handled in order so relayed traffic reaches each stream in
/// the order it was committed.
pub async fn run_streaming(
    manager: Arc<StreamingManager>,
    mut subscription: Subscription,
    status: StatusHandle,
) {
    while let Some(delivery) = subscription.next().await {
        match delivery {
            Delivery::NewBlock(height) => {
                manager.on_block(height).await;
            }
            Delivery::Event(event) => match manager.handle_event(&event).await {
                Ok(Some(outcome)) => {
                    let status = status.clone();
                    tokio::spawn(async move {
                        let ok = matches!(outcome.await, Ok(Ok(())));
                        status.record_outcome(ok).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(event = event.kind(), error = %e, "failed to open ceremony stream");
                    status.record_outcome(false).await;
                }
            },
        }
    }
    debug!("streaming dispatch loop stopped");
}
