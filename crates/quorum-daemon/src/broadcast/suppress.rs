use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use quorum_core::Msg;

use super::Broadcaster;
use crate::error::BroadcastError;

/// Outermost layer: turns execution failures into log lines
///
/// Pipeline and connectivity errors still reach the caller.
pub struct SuppressBroadcaster {
    inner: Arc<dyn Broadcaster>,
    enabled: bool,
}

impl SuppressBroadcaster {
    pub fn new(inner: Arc<dyn Broadcaster>, enabled: bool) -> Self {
        Self { inner, enabled }
    }
}

#[async_trait]
impl Broadcaster for SuppressBroadcaster {
    async fn broadcast(&self, msgs: Vec<Msg>) -> std::result::Result<(), BroadcastError> {
        match self.inner.broadcast(msgs).await {
            Err(BroadcastError::Execution {
                code,
                log,
                message_index,
            }) if self.enabled => {
                warn!(code, %log, ?message_index, "transaction failed on-chain");
                Ok(())
            }
            other => other,
        }
    }
}
