//! Fakes for the transport capability and RTP fixtures

use crate::transport::{
    ConnectionConfig, ConnectionState, GatheringComplete, OutboundTrack, RtcPeerConnection,
    RtcTransport, SessionDescription, StateChangeHandler,
};
use crate::types::StreamId;
use async_trait::async_trait;
use chakra_core::{Error, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::Marshal;

/// Offer SDP the fake connection refuses
pub const BAD_OFFER: &str = "bad offer";

/// A serialized RTP packet with the given sequence number
pub fn rtp_datagram(sequence_number: u16) -> Vec<u8> {
    let packet = Packet {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number,
            timestamp: u32::from(sequence_number) * 3000,
            ssrc: 0x1234_5678,
            ..Default::default()
        },
        payload: bytes::Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
    };
    packet.marshal().unwrap().to_vec()
}

/// Records every packet written to it
pub struct RecordingTrack {
    id: String,
    packets: Mutex<Vec<Packet>>,
}

impl RecordingTrack {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            packets: Mutex::new(Vec::new()),
        })
    }

    pub fn sequence_numbers(&self) -> Vec<u16> {
        self.packets
            .lock()
            .iter()
            .map(|p| p.header.sequence_number)
            .collect()
    }

    /// Wait until at least `count` packets have been written
    pub async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.packets.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for packets");
    }
}

#[async_trait]
impl OutboundTrack for RecordingTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        self.packets.lock().push(packet.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scripted peer connection
#[derive(Default)]
pub struct FakeConnection {
    pub tracks: Mutex<Vec<Arc<dyn OutboundTrack>>>,
    handler: Mutex<Option<StateChangeHandler>>,
    local: Mutex<Option<SessionDescription>>,
    /// Gathering never completes when set
    stall_gathering: bool,
    pub closed: AtomicBool,
}

impl FakeConnection {
    /// Deliver a state change to the registered observer
    pub fn fire(&self, state: ConnectionState) {
        if let Some(handler) = self.handler.lock().as_ref() {
            handler(state);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.lock().iter().map(|t| t.id().to_string()).collect()
    }
}

#[async_trait]
impl RtcPeerConnection for FakeConnection {
    async fn add_track(&self, track: Arc<dyn OutboundTrack>) -> Result<()> {
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp == BAD_OFFER {
            return Err(Error::NegotiationFailure("malformed SDP".to_string()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    fn on_connection_state_change(&self, handler: StateChangeHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn candidate_gathering(&self) -> GatheringComplete {
        if self.stall_gathering {
            Box::pin(std::future::pending())
        } else {
            Box::pin(std::future::ready(()))
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local
            .lock()
            .clone()
            .map(|d| SessionDescription::answer(format!("{}\r\na=candidate:1", d.sdp)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport handing out recording tracks and scripted connections
#[derive(Default)]
pub struct FakeTransport {
    stall_gathering: bool,
    /// `create_connection` fails when set
    refuse_connections: bool,
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
    pub ice_servers: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose connections never finish gathering candidates
    pub fn stalled() -> Arc<Self> {
        Arc::new(Self {
            stall_gathering: true,
            ..Default::default()
        })
    }

    /// Transport that cannot build peer connections
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse_connections: true,
            ..Default::default()
        })
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        Arc::clone(&self.connections.lock()[index])
    }
}

#[async_trait]
impl RtcTransport for FakeTransport {
    async fn create_track(&self, stream_id: &StreamId) -> Result<Arc<dyn OutboundTrack>> {
        Ok(RecordingTrack::new(stream_id.as_str()))
    }

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn RtcPeerConnection>> {
        *self.ice_servers.lock() = config.ice_servers.clone();
        if self.refuse_connections {
            return Err(Error::Internal("no ICE agent available".to_string()));
        }
        let connection = Arc::new(FakeConnection {
            stall_gathering: self.stall_gathering,
            ..Default::default()
        });
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}
