use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use quorum_core::Msg;

use super::{Broadcaster, Excluded};
use crate::error::BroadcastError;

struct Pending {
    msgs: Vec<Msg>,
    reply: oneshot::Sender<std::result::Result<(), BroadcastError>>,
}

/// Merges submissions that pile up while a broadcast is in flight
///
/// A single worker task drains the queue. Fewer than `threshold` pending
/// submissions go out one by one; at or above it they are merged into
/// batches of at most `size_limit` messages. When the layer below drops a
/// failed message from a merged batch, only the submission it came from
/// sees the failure.
pub struct BatchedBroadcaster {
    queue: mpsc::UnboundedSender<Pending>,
}

impl BatchedBroadcaster {
    pub fn spawn(inner: Arc<dyn Broadcaster>, threshold: usize, size_limit: usize) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(inner, rx, threshold, size_limit));
        Self { queue }
    }
}

#[async_trait]
impl Broadcaster for BatchedBroadcaster {
    async fn broadcast(&self, msgs: Vec<Msg>) -> std::result::Result<(), BroadcastError> {
        let stopped = || BroadcastError::Transport("broadcast pipeline stopped".to_string());

        let (reply, outcome) = oneshot::channel();
        self.queue
            .send(Pending { msgs, reply })
            .map_err(|_| stopped())?;
        outcome.await.map_err(|_| stopped())?
    }
}

async fn run(
    inner: Arc<dyn Broadcaster>,
    mut rx: mpsc::UnboundedReceiver<Pending>,
    threshold: usize,
    size_limit: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut pending = vec![first];
        while let Ok(next) = rx.try_recv() {
            pending.push(next);
        }

        if pending.len() < threshold {
            for submission in pending {
                let result = inner.broadcast(submission.msgs).await;
                let _ = submission.reply.send(result);
            }
            continue;
        }

        for chunk in into_chunks(pending, size_limit) {
            let msgs: Vec<Msg> = chunk.iter().flat_map(|p| p.msgs.iter().cloned()).collect();
            debug!(submissions = chunk.len(), messages = msgs.len(), "broadcasting merged batch");

            match inner.broadcast_partial(msgs).await {
                Ok(excluded) => reply_per_submission(chunk, &excluded),
                Err(e) => {
                    for submission in chunk {
                        let _ = submission.reply.send(Err(e.clone()));
                    }
                }
            }
        }
    }
}

/// Answer every submission of a merged batch
///
/// A submission with a dropped message gets that message's error, with the
/// index rebased onto the submission's own messages.
fn reply_per_submission(chunk: Vec<Pending>, excluded: &Excluded) {
    let mut start = 0;
    for submission in chunk {
        let span = start..start + submission.msgs.len();
        start = span.end;

        let failure = excluded
            .iter()
            .find(|(position, _)| span.contains(position))
            .map(|(position, e)| match e {
                BroadcastError::Execution { code, log, .. } => BroadcastError::Execution {
                    code: *code,
                    log: log.clone(),
                    message_index: Some(position - span.start),
                },
                other => other.clone(),
            });

        let _ = submission.reply.send(failure.map_or(Ok(()), Err));
    }
}

/// Greedy grouping; a submission larger than `size_limit` travels alone
fn into_chunks(pending: Vec<Pending>, size_limit: usize) -> Vec<Vec<Pending>> {
    let mut chunks: Vec<Vec<Pending>> = Vec::new();
    let mut current: Vec<Pending> = Vec::new();
    let mut current_len = 0;

    for submission in pending {
        let len = submission.msgs.len();
        if !current.is_empty() && current_len + len > size_limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += len;
        current.push(submission);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::testutil::{opt_in, RecordingBroadcaster};
    use crate::broadcast::RetryBroadcaster;
    use std::time::Duration;

    /// Holds the first broadcast until released, so later submissions queue up
    struct GatedBroadcaster {
        gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
        recorder: RecordingBroadcaster,
    }

    #[async_trait]
    impl Broadcaster for GatedBroadcaster {
        async fn broadcast(&self, msgs: Vec<Msg>) -> std::result::Result<(), BroadcastError> {
            let gate = self.gate.lock().await.take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.recorder.broadcast(msgs).await
        }
    }

    fn gated() -> (Arc<GatedBroadcaster>, oneshot::Sender<()>) {
        let (release, gate) = oneshot::channel();
        let inner = Arc::new(GatedBroadcaster {
            gate: tokio::sync::Mutex::new(Some(gate)),
            recorder: RecordingBroadcaster::default(),
        });
        (inner, release)
    }

    #[tokio::test]
    async fn test_below_threshold_sent_individually() {
        let inner = Arc::new(RecordingBroadcaster::default());
        let batched = BatchedBroadcaster::spawn(inner.clone(), 3, 250);

        batched.broadcast(vec![opt_in(1)]).await.unwrap();
        batched.broadcast(vec![opt_in(2)]).await.unwrap();

        assert_eq!(inner.calls(), vec![vec![opt_in(1)], vec![opt_in(2)]]);
    }

    #[tokio::test]
    async fn test_merges_at_threshold() {
        let (inner, release) = gated();
        let batched = Arc::new(BatchedBroadcaster::spawn(inner.clone(), 3, 250));

        let mut handles = Vec::new();
        for i in 0..4u8 {
            let batched = Arc::clone(&batched);
            handles.push(tokio::spawn(async move {
                batched.broadcast(vec![opt_in(i)]).await
            }));
            // let the worker pick up the first submission before the rest arrive
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        release.send(()).unwrap();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let calls = inner.recorder.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec![opt_in(0)]);
        assert_eq!(calls[1], vec![opt_in(1), opt_in(2), opt_in(3)]);
    }

    #[tokio::test]
    async fn test_merged_outcome_shared() {
        let (inner, release) = gated();
        inner
            .recorder
            .outcomes
            .lock()
            .unwrap()
            .extend([Ok(()), Err(BroadcastError::OutOfGas)]);
        let batched = Arc::new(BatchedBroadcaster::spawn(inner.clone(), 2, 250));

        let mut handles = Vec::new();
        for i in 0..3u8 {
            let batched = Arc::clone(&batched);
            handles.push(tokio::spawn(async move {
                batched.broadcast(vec![opt_in(i)]).await
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        release.send(()).unwrap();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(
            results,
            vec![
                Ok(()),
                Err(BroadcastError::OutOfGas),
                Err(BroadcastError::OutOfGas)
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_message_fails_only_its_submission() {
        let (inner, release) = gated();
        inner.recorder.outcomes.lock().unwrap().extend([
            Ok(()),
            Err(BroadcastError::Execution {
                code: 5,
                log: "already voted".to_string(),
                message_index: Some(0),
            }),
        ]);
        let retry = Arc::new(RetryBroadcaster::new(inner.clone(), 0, Duration::from_millis(1)));
        let batched = Arc::new(BatchedBroadcaster::spawn(retry, 2, 250));

        let mut handles = Vec::new();
        for i in 0..3u8 {
            let batched = Arc::clone(&batched);
            handles.push(tokio::spawn(async move {
                batched.broadcast(vec![opt_in(i)]).await
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        release.send(()).unwrap();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(
            inner.recorder.calls(),
            vec![vec![opt_in(0)], vec![opt_in(1), opt_in(2)], vec![opt_in(2)]]
        );
        assert_eq!(
            results,
            vec![
                Ok(()),
                Err(BroadcastError::Execution {
                    code: 5,
                    log: "already voted".to_string(),
                    message_index: Some(0),
                }),
                Ok(()),
            ]
        );
    }

    #[test]
    fn test_failure_rebased_onto_submission() {
        let (first, _first_rx) = oneshot::channel();
        let (second, mut second_rx) = oneshot::channel();
        let chunk = vec![
            Pending {
                msgs: vec![opt_in(1), opt_in(2)],
                reply: first,
            },
            Pending {
                msgs: vec![opt_in(3), opt_in(4)],
                reply: second,
            },
        ];
        let failure = BroadcastError::Execution {
            code: 1,
            log: "bad".to_string(),
            message_index: Some(3),
        };

        reply_per_submission(chunk, &vec![(3, failure)]);

        assert_eq!(
            second_rx.try_recv().unwrap(),
            Err(BroadcastError::Execution {
                code: 1,
                log: "bad".to_string(),
                message_index: Some(1),
            })
        );
    }

    #[test]
    fn test_chunks_respect_size_limit() {
        let pending: Vec<Pending> = [2usize, 2, 1, 5]
            .iter()
            .map(|&n| Pending {
                msgs: (0..n).map(|i| opt_in(i as u8)).collect(),
                reply: oneshot::channel().0,
            })
            .collect();

        let sizes: Vec<Vec<usize>> = into_chunks(pending, 4)
            .iter()
            .map(|chunk| chunk.iter().map(|p| p.msgs.len()).collect())
            .collect();
        assert_eq!(sizes, vec![vec![2, 2], vec![1], vec![5]]);
    }
}
