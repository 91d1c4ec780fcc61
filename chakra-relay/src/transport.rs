//! Real-time transport capability
//!
//! The relay drives peer connections through these traits so negotiation and
//! fan-out can be exercised without a network stack. [`crate::WebRtcTransport`] is the
//! production implementation.

use crate::types::StreamId;
use async_trait::async_trait;
use chakra_core::Result;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use webrtc::rtp::packet::Packet;

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// SDP in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub ice_servers: Vec<String>,
}

pub type StateChangeHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Resolves once ICE candidate gathering has finished
pub type GatheringComplete = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One outbound media track, shared by every viewer of a stream
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Forward one RTP packet to every attached connection
    async fn write_rtp(&self, packet: &Packet) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
pub trait RtcPeerConnection: Send + Sync {
    async fn add_track(&self, track: Arc<dyn OutboundTrack>) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Register the state observer. Replaces any previous handler.
    fn on_connection_state_change(&self, handler: StateChangeHandler);

    /// Must be obtained before `set_local_description`, which starts gathering.
    async fn candidate_gathering(&self) -> GatheringComplete;

    /// Local description including every gathered candidate
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait RtcTransport: Send + Sync {
    async fn create_track(&self, stream_id: &StreamId) -> Result<Arc<dyn OutboundTrack>>;

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn RtcPeerConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_shape() {
        let desc: SessionDescription =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(desc.kind, SdpType::Offer);

        let json = serde_json::to_value(SessionDescription::answer("v=0")).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0");
    }
}
