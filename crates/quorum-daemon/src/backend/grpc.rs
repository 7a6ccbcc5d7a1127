//! gRPC client for the signature backend

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use quorum_core::{PublicKey, Signature, StreamResult, TrafficOut};

use super::proto::{
    self, ceremony_client::CeremonyClient, ceremony_result, key_presence_response,
    keygen_response, message_in, message_out, multisig_client::MultisigClient, sign_response,
};
use super::{
    CeremonyStream, KeyPresence, SignatureBackend, StreamInit, StreamMessage, StreamingBackend,
    TrafficIn,
};
use crate::config::BackendConfig;
use crate::error::{DaemonError, Result};

/// Signature backend reached over gRPC
#[derive(Clone)]
pub struct GrpcBackend {
    channel: Channel,
    rpc_timeout: Duration,
}

impl GrpcBackend {
    /// Dial the backend, failing after the configured dial timeout
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let channel = Endpoint::from_shared(config.endpoint())?
            .connect_timeout(config.dial_timeout())
            .timeout(config.rpc_timeout())
            .connect()
            .await?;

        debug!(endpoint = %config.endpoint(), "connected to signature backend");

        Ok(Self {
            channel,
            rpc_timeout: config.rpc_timeout(),
        })
    }

    fn multisig(&self) -> MultisigClient<Channel> {
        MultisigClient::new(self.channel.clone())
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.rpc_timeout);
        request
    }
}

#[async_trait]
impl SignatureBackend for GrpcBackend {
    async fn keygen(&self, key_uid: &str, party_uid: &str) -> Result<PublicKey> {
        let request = proto::KeygenRequest {
            key_uid: key_uid.to_string(),
            party_uid: party_uid.to_string(),
        };
        let response = self
            .multisig()
            .keygen(self.request(request))
            .await?
            .into_inner();

        match response.keygen_response {
            Some(keygen_response::KeygenResponse::PubKey(bytes)) => {
                Ok(PublicKey::from_slice(&bytes)?)
            }
            Some(keygen_response::KeygenResponse::Error(e)) => Err(DaemonError::Backend(e)),
            None => Err(DaemonError::Backend("empty keygen response".to_string())),
        }
    }

    async fn sign(
        &self,
        key_uid: &str,
        digest: &[u8; 32],
        party_uid: &str,
        pub_key: &PublicKey,
    ) -> Result<Signature> {
        let request = proto::SignRequest {
            key_uid: key_uid.to_string(),
            msg_to_sign: digest.to_vec(),
            party_uid: party_uid.to_string(),
            pub_key: pub_key.as_bytes().to_vec(),
        };
        let response = self
            .multisig()
            .sign(self.request(request))
            .await?
            .into_inner();

        match response.sign_response {
            Some(sign_response::SignResponse::Signature(der)) => Ok(Signature::from_der(&der)?),
            Some(sign_response::SignResponse::Error(e)) => Err(DaemonError::Backend(e)),
            None => Err(DaemonError::Backend("empty sign response".to_string())),
        }
    }

    async fn key_presence(&self, key_uid: &str) -> Result<KeyPresence> {
        let request = proto::KeyPresenceRequest {
            key_uid: key_uid.to_string(),
        };
        let response = self
            .multisig()
            .key_presence(self.request(request))
            .await?
            .into_inner();

        let presence = match key_presence_response::Response::try_from(response.response) {
            Ok(key_presence_response::Response::Present) => KeyPresence::Present,
            Ok(key_presence_response::Response::Absent) => KeyPresence::Absent,
            Ok(key_presence_response::Response::Fail) => KeyPresence::Fail,
            Ok(key_presence_response::Response::Unspecified) | Err(_) => KeyPresence::Unspecified,
        };
        Ok(presence)
    }
}

#[async_trait]
impl StreamingBackend for GrpcBackend {
    async fn open(&self, init: StreamInit) -> Result<CeremonyStream> {
        let first = init_message(init);
        let is_keygen = matches!(first, message_in::Data::KeygenInit(_));

        let (to_backend, requests) = mpsc::unbounded_channel::<proto::MessageIn>();
        to_backend
            .send(proto::MessageIn { data: Some(first) })
            .map_err(|_| DaemonError::Backend("request stream closed".to_string()))?;

        let mut client = CeremonyClient::new(self.channel.clone());
        let requests = UnboundedReceiverStream::new(requests);
        let response = if is_keygen {
            client.keygen(requests).await?
        } else {
            client.sign(requests).await?
        };

        let (outbound, mut traffic) = mpsc::unbounded_channel::<TrafficIn>();
        tokio::spawn(async move {
            while let Some(msg) = traffic.recv().await {
                let msg = proto::MessageIn {
                    data: Some(message_in::Data::Traffic(proto::TrafficIn {
                        from_party_uid: msg.from_party_uid,
                        payload: msg.payload,
                        is_broadcast: msg.is_broadcast,
                    })),
                };
                if to_backend.send(msg).is_err() {
                    break;
                }
            }
        });

        let inbound = response
            .into_inner()
            .map(|item| item.map_err(DaemonError::from).and_then(decode_message_out))
            .boxed();

        Ok(CeremonyStream { outbound, inbound })
    }
}

fn init_message(init: StreamInit) -> message_in::Data {
    match init {
        StreamInit::Keygen {
            new_key_uid,
            party_uids,
            party_share_counts,
            my_party_index,
        } => message_in::Data::KeygenInit(proto::KeygenInit {
            new_key_uid,
            party_uids,
            party_share_counts,
            my_party_index,
        }),
        StreamInit::Sign {
            new_sig_uid,
            key_uid,
            party_uids,
            message_to_sign,
        } => message_in::Data::SignInit(proto::SignInit {
            new_sig_uid,
            key_uid,
            party_uids,
            message_to_sign,
        }),
    }
}

fn decode_message_out(msg: proto::MessageOut) -> Result<StreamMessage> {
    let unexpected = || DaemonError::Backend("unexpected message shape on ceremony stream".to_string());

    match msg.data.ok_or_else(unexpected)? {
        message_out::Data::Traffic(traffic) => Ok(StreamMessage::Traffic(TrafficOut {
            to_party_uid: traffic.to_party_uid,
            payload: traffic.payload,
            is_broadcast: traffic.is_broadcast,
        })),
        message_out::Data::KeygenResult(result) => match result.outcome.ok_or_else(unexpected)? {
            ceremony_result::Outcome::Data(pub_key) => {
                Ok(StreamMessage::Result(StreamResult::PubKey(pub_key)))
            }
            ceremony_result::Outcome::Criminals(list) => {
                Ok(StreamMessage::Result(StreamResult::Criminals(list.party_uids)))
            }
        },
        message_out::Data::SignResult(result) => match result.outcome.ok_or_else(unexpected)? {
            ceremony_result::Outcome::Data(signature) => {
                Ok(StreamMessage::Result(StreamResult::Signature(signature)))
            }
            ceremony_result::Outcome::Criminals(list) => {
                Ok(StreamMessage::Result(StreamResult::Criminals(list.party_uids)))
            }
        },
    }
}
