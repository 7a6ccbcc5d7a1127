use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use quorum_core::Msg;

use super::{Broadcaster, Excluded};
use crate::error::BroadcastError;

/// Resubmits failed broadcasts with linear backoff
///
/// A batch whose member failed execution is resubmitted without that
/// member. This does not count against the retry budget since every
/// exclusion shrinks the batch. Dropped members are reported through
/// [`Broadcaster::broadcast_partial`]; a plain [`Broadcaster::broadcast`]
/// fails with the first dropped member's error.
pub struct RetryBroadcaster {
    inner: Arc<dyn Broadcaster>,
    max_retries: u32,
    backoff: Duration,
}

impl RetryBroadcaster {
    pub fn new(inner: Arc<dyn Broadcaster>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }
}

#[async_trait]
impl Broadcaster for RetryBroadcaster {
    async fn broadcast(&self, msgs: Vec<Msg>) -> std::result::Result<(), BroadcastError> {
        match self.broadcast_partial(msgs).await?.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    async fn broadcast_partial(
        &self,
        mut msgs: Vec<Msg>,
    ) -> std::result::Result<Excluded, BroadcastError> {
        // original position of every message still in `msgs`
        let mut positions: Vec<usize> = (0..msgs.len()).collect();
        let mut excluded = Excluded::new();
        let mut attempt = 0;

        loop {
            match self.inner.broadcast(msgs.clone()).await {
                Ok(()) => return Ok(excluded),
                Err(BroadcastError::Execution {
                    code,
                    log,
                    message_index: Some(index),
                }) if msgs.len() > 1 && index < msgs.len() => {
                    let dropped = msgs.remove(index);
                    let position = positions.remove(index);
                    warn!(index = position, code, %log, excluded = ?dropped, "excluding failed batch member");
                    excluded.push((
                        position,
                        BroadcastError::Execution {
                            code,
                            log,
                            message_index: Some(position),
                        },
                    ));
                }
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff * attempt;
                    warn!(attempt, ?delay, error = %e, "broadcast failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
