//! Node router
//!
//! Routes control-plane requests to the node that owns a stream. Remote
//! negotiations travel as envelopes over the message bus: the request goes to
//! `chakra.<owner>`, the answer comes back on `chakra.<requester>` under the
//! same correlation id.

use crate::sync::bus::MessageBus;
use crate::sync::dedup::MessageDeduplicator;
use crate::sync::envelope::{
    node_channel, CreatePeerRequest, CreatePeerResponse, Envelope, EnvelopeType,
};
use chakra_core::{Error, Result};
use chakra_relay::{PeerSessionNegotiator, SessionDescription, StreamId, StreamInfo, StreamRegistry};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a requester waits for the owning node to answer
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Identity and reachability of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub grpc_address: String,
}

pub struct NodeRouter {
    node: NodeRecord,
    bus: Arc<dyn MessageBus>,
    registry: Arc<StreamRegistry>,
    negotiator: Arc<PeerSessionNegotiator>,
    /// Outstanding remote requests by correlation id
    pending: DashMap<String, oneshot::Sender<CreatePeerResponse>>,
    dedup: MessageDeduplicator,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl NodeRouter {
    pub fn new(
        node: NodeRecord,
        bus: Arc<dyn MessageBus>,
        registry: Arc<StreamRegistry>,
        negotiator: Arc<PeerSessionNegotiator>,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        Arc::new(Self {
            node,
            bus,
            registry,
            negotiator,
            pending: DashMap::new(),
            dedup: MessageDeduplicator::with_defaults(cancel.clone()),
            request_timeout,
            cancel,
        })
    }

    /// Subscribe to this node's channel and dispatch incoming envelopes.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let channel = node_channel(&self.node.node_id);
        let mut messages = self.bus.subscribe(&channel).await?;
        info!(node_id = %self.node.node_id, channel = %channel, "Node router listening");

        let router = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    () = router.cancel.cancelled() => break,
                    payload = messages.recv() => payload,
                };
                let Some(payload) = payload else {
                    warn!(node_id = %router.node.node_id, "Node channel closed");
                    break;
                };
                router.handle_message(&payload);
            }
            debug!(node_id = %router.node.node_id, "Node router stopped");
        }))
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pending.clear();
    }

    #[must_use]
    pub const fn node(&self) -> &NodeRecord {
        &self.node
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node.node_id
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Create a stream owned by this node.
    pub async fn create_stream(&self, name: &str, allowed_hosts: Vec<IpAddr>) -> Result<StreamInfo> {
        self.registry.create_stream(name, allowed_hosts).await
    }

    /// Negotiate a viewer session on the stream's owning node.
    pub async fn create_peer(
        &self,
        target_node_id: &str,
        stream_id: &StreamId,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        if target_node_id.is_empty() || target_node_id == self.node.node_id {
            return self.create_local_peer(stream_id, offer).await;
        }

        let correlation_id = nanoid::nanoid!(16);
        let request = CreatePeerRequest {
            stream_id: stream_id.clone(),
            offer,
        };
        let envelope = Envelope {
            kind: EnvelopeType::CreatePeer,
            target_node_id: target_node_id.to_string(),
            source_node_id: self.node.node_id.clone(),
            correlation_id: correlation_id.clone(),
            payload: serde_json::to_value(&request)?,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        debug!(
            target_node_id,
            stream_id = %stream_id,
            correlation_id = %correlation_id,
            "Routing create-peer to owning node"
        );

        let payload = serde_json::to_string(&envelope)?;
        if let Err(e) = self.bus.publish(&node_channel(target_node_id), payload).await {
            self.pending.remove(&correlation_id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(Error::Unavailable("node router shut down".to_string())),
            Err(_) => {
                self.pending.remove(&correlation_id);
                warn!(target_node_id, correlation_id = %correlation_id, "Remote create-peer timed out");
                Err(Error::Unavailable(format!(
                    "node {target_node_id} did not answer within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    async fn create_local_peer(
        &self,
        stream_id: &StreamId,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        let stream = self
            .registry
            .get_stream(stream_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("stream {stream_id}")))?;
        self.negotiator.create_peer(&stream, offer).await
    }

    fn handle_message(self: &Arc<Self>, payload: &str) {
        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Failed to deserialize envelope");
                return;
            }
        };

        if envelope.target_node_id != self.node.node_id {
            debug!(target_node_id = %envelope.target_node_id, "Ignoring envelope for another node");
            return;
        }

        if !self.dedup.should_process(&envelope.dedup_key()) {
            debug!(correlation_id = %envelope.correlation_id, kind = envelope.kind.as_str(), "Skipping duplicate envelope");
            return;
        }

        match envelope.kind {
            EnvelopeType::CreatePeer => {
                // Negotiation waits on ICE gathering; never block the channel reader
                let router = Arc::clone(self);
                tokio::spawn(async move { router.answer_remote_peer(envelope).await });
            }
            EnvelopeType::CreatePeerResult => self.complete_pending(envelope),
        }
    }

    async fn answer_remote_peer(&self, envelope: Envelope) {
        let result = match serde_json::from_value::<CreatePeerRequest>(envelope.payload) {
            Ok(request) => self.create_local_peer(&request.stream_id, request.offer).await,
            Err(e) => Err(Error::InvalidInput(format!("malformed create-peer payload: {e}"))),
        };

        if let Err(e) = &result {
            debug!(correlation_id = %envelope.correlation_id, error = %e, "Remote create-peer failed");
        }

        let response = Envelope {
            kind: EnvelopeType::CreatePeerResult,
            target_node_id: envelope.source_node_id.clone(),
            source_node_id: self.node.node_id.clone(),
            correlation_id: envelope.correlation_id.clone(),
            payload: match serde_json::to_value(CreatePeerResponse::from_result(&result)) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize create-peer response");
                    return;
                }
            },
        };

        let published = match serde_json::to_string(&response) {
            Ok(payload) => self.bus.publish(&node_channel(&envelope.source_node_id), payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = published {
            warn!(
                correlation_id = %envelope.correlation_id,
                target_node_id = %envelope.source_node_id,
                error = %e,
                "Failed to publish create-peer response"
            );
        }
    }

    fn complete_pending(&self, envelope: Envelope) {
        let Some((_, tx)) = self.pending.remove(&envelope.correlation_id) else {
            debug!(correlation_id = %envelope.correlation_id, "No pending request for response");
            return;
        };

        match serde_json::from_value::<CreatePeerResponse>(envelope.payload) {
            Ok(response) => {
                let _ = tx.send(response);
            }
            Err(e) => {
                warn!(correlation_id = %envelope.correlation_id, error = %e, "Malformed create-peer response");
                let _ = tx.send(CreatePeerResponse {
                    answer: None,
                    error: Some(crate::sync::envelope::RemoteError::from(&Error::Internal(
                        "malformed response from remote node".to_string(),
                    ))),
                });
            }
        }
    }
}
