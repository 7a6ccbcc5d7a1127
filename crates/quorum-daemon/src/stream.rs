//! Coordinator for ceremonies run over a bidirectional backend stream
//!
//! Every session this validator takes part in gets its own stream and a
//! task draining it. Traffic from the backend is relayed on-chain, traffic
//! relayed by other parties is fed back into the stream.

use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use quorum_core::{Event, Msg, StreamResult, TrafficOut, ValAddress};

use crate::backend::{StreamInit, StreamMessage, StreamingBackend, TrafficIn};
use crate::broadcast::{pending_sender, Broadcaster};
use crate::error::{DaemonError, Result};
use crate::session::{OutcomeCell, SessionRegistry};
use crate::timeout::{TimeoutQueue, TimeoutSignal};

/// Resolves once the session's stream task finished
pub type SessionOutcome = oneshot::Receiver<Result<()>>;

type Registry = SessionRegistry<mpsc::UnboundedSender<TrafficIn>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    Keygen,
    Sign,
}

impl std::fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CeremonyKind::Keygen => write!(f, "keygen"),
            CeremonyKind::Sign => write!(f, "sign"),
        }
    }
}

pub struct StreamingManager {
    backend: Arc<dyn StreamingBackend>,
    broadcaster: Arc<dyn Broadcaster>,
    validator: ValAddress,
    keygens: Arc<Registry>,
    signs: Arc<Registry>,
    keygen_timeouts: TimeoutQueue,
    sign_timeouts: TimeoutQueue,
}

impl StreamingManager {
    pub fn new(
        backend: Arc<dyn StreamingBackend>,
        broadcaster: Arc<dyn Broadcaster>,
        validator: ValAddress,
    ) -> Self {
        Self {
            backend,
            broadcaster,
            validator,
            keygens: Arc::new(SessionRegistry::new()),
            signs: Arc::new(SessionRegistry::new()),
            keygen_timeouts: TimeoutQueue::new(),
            sign_timeouts: TimeoutQueue::new(),
        }
    }

    /// React to one ledger event
    ///
    /// Returns the outcome receiver when the event opened a new session.
    pub async fn handle_event(&self, event: &Event) -> Result<Option<SessionOutcome>> {
        match event {
            Event::KeygenStarted {
                key_id,
                participants,
                share_counts,
                expires_at,
            } => {
                let index = match participants.iter().position(|p| p == &self.validator) {
                    Some(index) => index,
                    None => return Ok(None),
                };
                let init = StreamInit::Keygen {
                    new_key_uid: key_id.to_string(),
                    party_uids: participants.iter().map(|p| p.to_hex()).collect(),
                    party_share_counts: share_counts.clone(),
                    my_party_index: index as u32,
                };
                self.open(CeremonyKind::Keygen, key_id.to_string(), init, *expires_at)
                    .await
                    .map(Some)
            }
            Event::SigningStarted {
                sig_id,
                key_id,
                payload_hash,
                pub_keys,
                expires_at,
                ..
            } => {
                if !pub_keys.contains_key(&self.validator) {
                    return Ok(None);
                }
                let init = StreamInit::Sign {
                    new_sig_uid: sig_id.to_string(),
                    key_uid: key_id.to_string(),
                    party_uids: pub_keys.keys().map(|p| p.to_hex()).collect(),
                    message_to_sign: payload_hash.as_bytes().to_vec(),
                };
                self.open(CeremonyKind::Sign, sig_id.to_string(), init, *expires_at)
                    .await
                    .map(Some)
            }
            Event::KeygenTraffic {
                session_id,
                from,
                payload,
            } => {
                self.forward(CeremonyKind::Keygen, session_id, from, payload)
                    .await;
                Ok(None)
            }
            Event::SignTraffic {
                session_id,
                from,
                payload,
            } => {
                self.forward(CeremonyKind::Sign, session_id, from, payload)
                    .await;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Cancel every session whose expiry height was reached
    pub async fn on_block(&self, height: u64) -> Vec<String> {
        let mut expired = self.keygen_timeouts.process(height).await;
        expired.extend(self.sign_timeouts.process(height).await);
        expired
    }

    pub async fn open_sessions(&self, kind: CeremonyKind) -> usize {
        self.registry(kind).len().await
    }

    fn registry(&self, kind: CeremonyKind) -> &Arc<Registry> {
        match kind {
            CeremonyKind::Keygen => &self.keygens,
            CeremonyKind::Sign => &self.signs,
        }
    }

    fn timeouts(&self, kind: CeremonyKind) -> &TimeoutQueue {
        match kind {
            CeremonyKind::Keygen => &self.keygen_timeouts,
            CeremonyKind::Sign => &self.sign_timeouts,
        }
    }

    async fn open(
        &self,
        kind: CeremonyKind,
        session_id: String,
        init: StreamInit,
        expires_at: u64,
    ) -> Result<SessionOutcome> {
        let registry = self.registry(kind);
        registry.reserve(&session_id).await?;

        let stream = match self.backend.open(init).await {
            Ok(stream) => stream,
            Err(e) => {
                registry.remove(&session_id).await;
                return Err(e);
            }
        };
        registry.register(&session_id, stream.outbound).await?;
        let timeout = self.timeouts(kind).enqueue(session_id.clone(), expires_at).await;

        info!(%kind, session_id = %session_id, expires_at, "ceremony stream opened");

        let (outcome, rx) = OutcomeCell::new(session_id.clone());
        let drain = Drain {
            kind,
            session_id,
            broadcaster: Arc::clone(&self.broadcaster),
            registry: Arc::clone(registry),
        };
        tokio::spawn(drain.run(stream.inbound, timeout, outcome));

        Ok(rx)
    }

    async fn forward(
        &self,
        kind: CeremonyKind,
        session_id: &str,
        from: &ValAddress,
        payload: &TrafficOut,
    ) {
        if !payload.is_broadcast && payload.to_party_uid != self.validator.to_hex() {
            return;
        }
        if payload.is_broadcast && from == &self.validator {
            return;
        }

        let outbound = match self.registry(kind).get(session_id).await {
            Some(outbound) => outbound,
            None => return,
        };

        let msg = TrafficIn {
            from_party_uid: from.to_hex(),
            payload: payload.payload.clone(),
            is_broadcast: payload.is_broadcast,
        };
        if outbound.send(msg).is_err() {
            debug!(%kind, session_id, "stream closed before traffic could be delivered");
        }
    }
}

/// State owned by the task draining one session's stream
struct Drain {
    kind: CeremonyKind,
    session_id: String,
    broadcaster: Arc<dyn Broadcaster>,
    registry: Arc<Registry>,
}

impl Drain {
    async fn run(
        self,
        mut inbound: BoxStream<'static, Result<StreamMessage>>,
        mut timeout: TimeoutSignal,
        outcome: OutcomeCell<Result<()>>,
    ) {
        let result = loop {
            tokio::select! {
                item = inbound.next() => match item {
                    Some(Ok(StreamMessage::Traffic(payload))) => {
                        if let Err(e) = self.broadcaster.broadcast(vec![self.traffic(payload)]).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(StreamMessage::Result(result))) => {
                        break self
                            .broadcaster
                            .broadcast(vec![self.vote(result)])
                            .await
                            .map_err(DaemonError::from);
                    }
                    Some(Err(e)) => break Err(e),
                    // protocols without an explicit result end with EOF
                    None => break Ok(()),
                },
                _ = timeout.changed() => break Err(DaemonError::Timeout),
            }
        };

        self.registry.remove(&self.session_id).await;

        match &result {
            Ok(()) => info!(kind = %self.kind, session_id = %self.session_id, "ceremony stream finished"),
            Err(e) => warn!(kind = %self.kind, session_id = %self.session_id, error = %e, "ceremony stream aborted"),
        }
        outcome.set(result);
    }

    fn traffic(&self, payload: TrafficOut) -> Msg {
        let sender = pending_sender();
        let session_id = self.session_id.clone();
        match self.kind {
            CeremonyKind::Keygen => Msg::ProcessKeygenTraffic {
                sender,
                session_id,
                payload,
            },
            CeremonyKind::Sign => Msg::ProcessSignTraffic {
                sender,
                session_id,
                payload,
            },
        }
    }

    fn vote(&self, result: StreamResult) -> Msg {
        Msg::SubmitStreamResult {
            sender: pending_sender(),
            session_id: self.session_id.clone(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CeremonyStream;
    use crate::broadcast::testutil::RecordingBroadcaster;
    use async_trait::async_trait;
    use quorum_core::{Hash, KeyId, PublicKey, RequesterModule};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    /// Test side of one opened stream
    struct OpenedStream {
        init: StreamInit,
        from_daemon: mpsc::UnboundedReceiver<TrafficIn>,
        to_daemon: mpsc::UnboundedSender<Result<StreamMessage>>,
    }

    #[derive(Default)]
    struct MockStreams {
        opened: Mutex<Vec<OpenedStream>>,
        /// How long opening a stream takes
        open_delay: Option<std::time::Duration>,
        /// Fail the next open
        refuse: std::sync::atomic::AtomicBool,
    }

    impl MockStreams {
        fn take(&self) -> OpenedStream {
            self.opened.lock().unwrap().remove(0)
        }

        fn count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl StreamingBackend for MockStreams {
        async fn open(&self, init: StreamInit) -> Result<CeremonyStream> {
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            if self.refuse.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(DaemonError::Backend("stream refused".to_string()));
            }
            let (outbound, from_daemon) = mpsc::unbounded_channel();
            let (to_daemon, inbound) = mpsc::unbounded_channel();
            self.opened.lock().unwrap().push(OpenedStream {
                init,
                from_daemon,
                to_daemon,
            });
            Ok(CeremonyStream {
                outbound,
                inbound: UnboundedReceiverStream::new(inbound).boxed(),
            })
        }
    }

    fn validator(i: u8) -> ValAddress {
        ValAddress::new(vec![0x0a, i])
    }

    fn keygen_started(participants: Vec<ValAddress>, expires_at: u64) -> Event {
        Event::KeygenStarted {
            key_id: KeyId::new("key-1"),
            share_counts: vec![1; participants.len()],
            participants,
            expires_at,
        }
    }

    fn setup() -> (StreamingManager, Arc<MockStreams>, Arc<RecordingBroadcaster>) {
        let backend = Arc::new(MockStreams::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let manager = StreamingManager::new(backend.clone(), broadcaster.clone(), validator(2));
        (manager, backend, broadcaster)
    }

    #[tokio::test]
    async fn test_non_participant_stays_silent() {
        let (manager, backend, broadcaster) = setup();

        let outcome = manager
            .handle_event(&keygen_started(vec![validator(1), validator(3)], 10))
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert_eq!(backend.count(), 0);
        assert!(broadcaster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_keygen_stream_relays_traffic_and_result() {
        let (manager, backend, broadcaster) = setup();

        let outcome = manager
            .handle_event(&keygen_started(vec![validator(1), validator(2)], 10))
            .await
            .unwrap()
            .unwrap();
        let stream = backend.take();
        assert_eq!(
            stream.init,
            StreamInit::Keygen {
                new_key_uid: "key-1".to_string(),
                party_uids: vec!["0a01".to_string(), "0a02".to_string()],
                party_share_counts: vec![1, 1],
                my_party_index: 1,
            }
        );

        let traffic = TrafficOut {
            to_party_uid: String::new(),
            payload: vec![7],
            is_broadcast: true,
        };
        stream
            .to_daemon
            .send(Ok(StreamMessage::Traffic(traffic.clone())))
            .unwrap();
        stream
            .to_daemon
            .send(Ok(StreamMessage::Result(StreamResult::PubKey(vec![2; 33]))))
            .unwrap();

        assert!(outcome.await.unwrap().is_ok());
        assert_eq!(manager.open_sessions(CeremonyKind::Keygen).await, 0);

        let calls = broadcaster.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            vec![Msg::ProcessKeygenTraffic {
                sender: pending_sender(),
                session_id: "key-1".to_string(),
                payload: traffic,
            }]
        );
        assert!(matches!(
            &calls[1][0],
            Msg::SubmitStreamResult { session_id, result: StreamResult::PubKey(_), .. } if session_id == "key-1"
        ));
    }

    #[tokio::test]
    async fn test_reopening_session_rejected() {
        let (manager, _backend, _) = setup();
        let event = keygen_started(vec![validator(2)], 10);

        let _outcome = manager.handle_event(&event).await.unwrap();
        assert!(matches!(
            manager.handle_event(&event).await,
            Err(DaemonError::SessionExists(id)) if id == "key-1"
        ));
    }

    #[tokio::test]
    async fn test_overlapping_opens_reach_backend_once() {
        let backend = Arc::new(MockStreams {
            open_delay: Some(std::time::Duration::from_millis(50)),
            ..Default::default()
        });
        let manager =
            StreamingManager::new(backend.clone(), Arc::new(RecordingBroadcaster::default()), validator(2));
        let event = keygen_started(vec![validator(2)], 10);

        let (first, second) =
            tokio::join!(manager.handle_event(&event), manager.handle_event(&event));

        assert!(first.unwrap().is_some());
        assert!(matches!(second, Err(DaemonError::SessionExists(id)) if id == "key-1"));
        assert_eq!(backend.count(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_releases_session_id() {
        let (manager, backend, _) = setup();
        backend.refuse.store(true, std::sync::atomic::Ordering::SeqCst);
        let event = keygen_started(vec![validator(2)], 10);

        assert!(matches!(
            manager.handle_event(&event).await,
            Err(DaemonError::Backend(_))
        ));
        assert_eq!(manager.open_sessions(CeremonyKind::Keygen).await, 0);

        assert!(manager.handle_event(&event).await.unwrap().is_some());
        assert_eq!(backend.count(), 1);
    }

    #[tokio::test]
    async fn test_incoming_traffic_filtering() {
        let (manager, backend, _) = setup();
        let _outcome = manager
            .handle_event(&keygen_started(vec![validator(1), validator(2)], 10))
            .await
            .unwrap();
        let mut stream = backend.take();

        let relay = |from: ValAddress, to: &str, is_broadcast: bool| Event::KeygenTraffic {
            session_id: "key-1".to_string(),
            from,
            payload: TrafficOut {
                to_party_uid: to.to_string(),
                payload: vec![1],
                is_broadcast,
            },
        };

        // addressed to someone else
        manager.handle_event(&relay(validator(1), "0a03", false)).await.unwrap();
        // our own broadcast coming back
        manager.handle_event(&relay(validator(2), "", true)).await.unwrap();
        // unknown session
        manager
            .handle_event(&Event::KeygenTraffic {
                session_id: "other".to_string(),
                from: validator(1),
                payload: TrafficOut {
                    to_party_uid: "0a02".to_string(),
                    payload: vec![1],
                    is_broadcast: false,
                },
            })
            .await
            .unwrap();
        assert!(stream.from_daemon.try_recv().is_err());

        manager.handle_event(&relay(validator(1), "0a02", false)).await.unwrap();
        manager.handle_event(&relay(validator(1), "", true)).await.unwrap();

        let direct = stream.from_daemon.recv().await.unwrap();
        assert_eq!(direct.from_party_uid, "0a01");
        assert!(!direct.is_broadcast);
        assert!(stream.from_daemon.recv().await.unwrap().is_broadcast);
    }

    #[tokio::test]
    async fn test_timeout_cancels_session() {
        let (manager, backend, broadcaster) = setup();
        let outcome = manager
            .handle_event(&keygen_started(vec![validator(2)], 10))
            .await
            .unwrap()
            .unwrap();
        let _stream = backend.take();

        assert!(manager.on_block(9).await.is_empty());
        assert_eq!(manager.on_block(10).await, vec!["key-1".to_string()]);

        assert!(matches!(outcome.await.unwrap(), Err(DaemonError::Timeout)));
        assert_eq!(manager.open_sessions(CeremonyKind::Keygen).await, 0);
        assert!(broadcaster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sign_timeout_not_held_up_by_keygen() {
        let (manager, backend, _) = setup();
        let _keygen = manager
            .handle_event(&keygen_started(vec![validator(2)], 30))
            .await
            .unwrap()
            .unwrap();

        let mut pub_keys = BTreeMap::new();
        pub_keys.insert(validator(2), PublicKey::new([2; 33]));
        let sign = manager
            .handle_event(&Event::SigningStarted {
                sig_id: 1,
                key_id: KeyId::new("key-0"),
                payload_hash: Hash::new([9; 32]),
                module: RequesterModule::Evm,
                pub_keys,
                expires_at: 12,
            })
            .await
            .unwrap()
            .unwrap();
        let _streams = (backend.take(), backend.take());

        assert_eq!(manager.on_block(12).await, vec!["1".to_string()]);
        assert!(matches!(sign.await.unwrap(), Err(DaemonError::Timeout)));
        assert_eq!(manager.open_sessions(CeremonyKind::Keygen).await, 1);
    }

    #[tokio::test]
    async fn test_eof_is_success() {
        let (manager, backend, _) = setup();
        let mut pub_keys = BTreeMap::new();
        pub_keys.insert(validator(2), PublicKey::new([2; 33]));

        let outcome = manager
            .handle_event(&Event::SigningStarted {
                sig_id: 4,
                key_id: KeyId::new("key-1"),
                payload_hash: Hash::new([9; 32]),
                module: RequesterModule::Evm,
                pub_keys,
                expires_at: 20,
            })
            .await
            .unwrap()
            .unwrap();

        let stream = backend.take();
        assert!(matches!(
            &stream.init,
            StreamInit::Sign { new_sig_uid, message_to_sign, .. }
                if new_sig_uid == "4" && message_to_sign == &vec![9; 32]
        ));
        drop(stream);

        assert!(outcome.await.unwrap().is_ok());
        assert_eq!(manager.open_sessions(CeremonyKind::Sign).await, 0);
    }

    #[tokio::test]
    async fn test_backend_error_aborts_only_that_session() {
        let (manager, backend, _) = setup();
        let first = manager
            .handle_event(&keygen_started(vec![validator(2)], 10))
            .await
            .unwrap()
            .unwrap();
        let second = manager
            .handle_event(&Event::KeygenStarted {
                key_id: KeyId::new("key-2"),
                participants: vec![validator(2)],
                share_counts: vec![1],
                expires_at: 10,
            })
            .await
            .unwrap()
            .unwrap();

        let failing = backend.take();
        failing
            .to_daemon
            .send(Err(DaemonError::Backend("boom".to_string())))
            .unwrap();

        assert!(matches!(first.await.unwrap(), Err(DaemonError::Backend(_))));
        assert_eq!(manager.open_sessions(CeremonyKind::Keygen).await, 1);

        drop(backend.take());
        assert!(second.await.unwrap().is_ok());
    }
}
