//! Per-block execution context

use chrono::{DateTime, Utc};

use quorum_core::Event;

/// Height, time and the events emitted so far in the current block
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub height: u64,
    pub time: DateTime<Utc>,
    events: Vec<Event>,
}

impl BlockContext {
    pub fn new(height: u64, time: DateTime<Utc>) -> Self {
        Self {
            height,
            time,
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Take the events emitted so far, leaving the context empty
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Context for work whose events are only kept if it succeeds
    pub(crate) fn branch(&self) -> Self {
        Self::new(self.height, self.time)
    }

    pub(crate) fn merge(&mut self, branch: BlockContext) {
        self.events.extend(branch.events);
    }
}
