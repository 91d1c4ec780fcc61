//! Viewer session negotiation: SDP offer in, SDP answer with all candidates out

use crate::config::RelayConfig;
use crate::stream::Stream;
use crate::transport::{ConnectionConfig, RtcPeerConnection, RtcTransport, SdpType, SessionDescription};
use crate::types::PeerId;
use chakra_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PeerSessionNegotiator {
    transport: Arc<dyn RtcTransport>,
    ice_servers: Vec<String>,
    gathering_timeout: Duration,
}

impl PeerSessionNegotiator {
    #[must_use]
    pub fn new(transport: Arc<dyn RtcTransport>, config: &RelayConfig) -> Self {
        Self {
            transport,
            ice_servers: config.stun_servers.clone(),
            gathering_timeout: config.ice_gathering_timeout,
        }
    }

    /// Attach a new viewer connection to the stream's shared track and answer its offer.
    ///
    /// No trickle ICE: the answer carries every gathered candidate. The stream
    /// owns the connection from then on. On failure the partially built
    /// connection is closed and the stream is untouched.
    pub async fn create_peer(
        &self,
        stream: &Arc<Stream>,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        if offer.kind != SdpType::Offer {
            return Err(Error::NegotiationFailure(format!(
                "expected an offer, got {:?}",
                offer.kind
            )));
        }

        let guard = stream
            .begin_attach()
            .ok_or_else(|| Error::NotFound(format!("stream {} is shutting down", stream.id())))?;

        let connection = self
            .transport
            .create_connection(&ConnectionConfig {
                ice_servers: self.ice_servers.clone(),
            })
            .await
            .map_err(|e| {
                Error::NegotiationFailure(format!("failed to create peer connection: {e}"))
            })?;

        let peer_id = PeerId::generate();
        let result = match self
            .negotiate(&connection, guard.stream(), &peer_id, offer)
            .await
        {
            Ok(answer) if stream.add_peer(peer_id.clone(), Arc::clone(&connection)) => Ok(answer),
            Ok(_) => Err(Error::NotFound(format!(
                "stream {} stopped during negotiation",
                stream.id()
            ))),
            Err(e) => Err(e),
        };

        match result {
            Ok(answer) => {
                info!(stream_id = %stream.id(), peer_id = %peer_id, "Viewer session negotiated");
                Ok(answer)
            }
            Err(e) => {
                warn!(stream_id = %stream.id(), error = %e, "Viewer negotiation failed");
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "Failed to close abandoned connection");
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        connection: &Arc<dyn RtcPeerConnection>,
        stream: &Arc<Stream>,
        peer_id: &PeerId,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        connection.add_track(stream.track()).await?;
        connection.on_connection_state_change(stream.connection_observer(peer_id.clone()));

        connection.set_remote_description(offer).await?;
        let answer = connection.create_answer().await?;

        let gathering = connection.candidate_gathering().await;
        connection.set_local_description(answer).await?;

        tokio::time::timeout(self.gathering_timeout, gathering)
            .await
            .map_err(|_| {
                Error::NegotiationFailure(format!(
                    "ICE gathering did not complete within {:?}",
                    self.gathering_timeout
                ))
            })?;

        connection
            .local_description()
            .await
            .ok_or_else(|| Error::NegotiationFailure("no local description after gathering".to_string()))
    }
}
