//! webrtc-rs backed transport

use crate::transport::{
    ConnectionConfig, ConnectionState, GatheringComplete, OutboundTrack, RtcPeerConnection,
    RtcTransport, SdpType, SessionDescription, StateChangeHandler,
};
use crate::types::StreamId;
use async_trait::async_trait;
use chakra_core::{Error, Result};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

/// Buffer for RTCP packets drained from each sender
const RTCP_BUFFER_SIZE: usize = 1500;

const H264_CLOCK_RATE: u32 = 90_000;
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(Error::NegotiationFailure(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| Error::NegotiationFailure(format!("malformed SDP: {e}")))
}

fn from_rtc_description(description: RTCSessionDescription) -> SessionDescription {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Answer | RTCSdpType::Unspecified => SdpType::Answer,
    };
    SessionDescription {
        kind,
        sdp: description.sdp,
    }
}

/// H.264 track fed from a stream's ingest loop
pub struct RtpTrack {
    id: String,
    inner: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl OutboundTrack for RtpTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        self.inner
            .write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(|e| Error::Internal(format!("failed to write RTP: {e}")))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl RtcPeerConnection for WebRtcPeerConnection {
    async fn add_track(&self, track: Arc<dyn OutboundTrack>) -> Result<()> {
        let rtp_track = track
            .as_any()
            .downcast_ref::<RtpTrack>()
            .ok_or_else(|| Error::Internal("track was not created by this transport".to_string()))?;

        let sender = self
            .pc
            .add_track(Arc::clone(&rtp_track.inner) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::NegotiationFailure(format!("failed to add track: {e}")))?;

        // Receiver reports must be read for the sender's interceptors to run
        let track_id = rtp_track.id.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut buf).await.is_ok() {}
            trace!(track_id = %track_id, "RTCP drain finished");
        });

        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| Error::NegotiationFailure(format!("remote description rejected: {e}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.pc
            .create_answer(None)
            .await
            .map(from_rtc_description)
            .map_err(|e| Error::NegotiationFailure(format!("failed to create answer: {e}")))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| Error::NegotiationFailure(format!("local description rejected: {e}")))
    }

    fn on_connection_state_change(&self, handler: StateChangeHandler) {
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!(state = %state, "Peer connection state changed");
                handler(ConnectionState::from(state));
                Box::pin(async {})
            }));
    }

    async fn candidate_gathering(&self) -> GatheringComplete {
        let mut done = self.pc.gathering_complete_promise().await;
        Box::pin(async move {
            let _ = done.recv().await;
        })
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(from_rtc_description)
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::Internal(format!("failed to close peer connection: {e}")))
    }
}

/// Production transport. The media engine and interceptors are built once and
/// shared by every connection.
pub struct WebRtcTransport {
    api: API,
}

impl WebRtcTransport {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Internal(format!("failed to register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::Internal(format!("failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

#[async_trait]
impl RtcTransport for WebRtcTransport {
    async fn create_track(&self, stream_id: &StreamId) -> Result<Arc<dyn OutboundTrack>> {
        let inner = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: H264_CLOCK_RATE,
                sdp_fmtp_line: H264_FMTP.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            format!("chakra-{stream_id}"),
        ));

        Ok(Arc::new(RtpTrack {
            id: stream_id.to_string(),
            inner,
        }))
    }

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn RtcPeerConnection>> {
        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = self
            .api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| Error::Internal(format!("failed to create peer connection: {e}")))?;

        Ok(Arc::new(WebRtcPeerConnection { pc: Arc::new(pc) }))
    }
}
