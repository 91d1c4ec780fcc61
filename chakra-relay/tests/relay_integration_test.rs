// Integration tests for the relay against the webrtc-rs transport
//
// Covers:
// - RTP published over UDP reaching the shared track
// - A browser-style recvonly offer negotiated into an answer
// - Stream teardown freeing the port for the next stream

use chakra_core::HostPolicy;
use chakra_relay::{
    PeerSessionNegotiator, RelayConfig, SdpType, SessionDescription, StreamRegistry,
    StreamState, WebRtcTransport,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::util::marshal::Marshal;

fn relay_config(start_port: u16, end_port: u16) -> RelayConfig {
    RelayConfig {
        bind_address: IpAddr::from([127, 0, 0, 1]),
        start_port,
        end_port,
        host_policy: HostPolicy::Permissive,
        ice_gathering_timeout: Duration::from_secs(5),
        // Host candidates only, no network access needed
        stun_servers: Vec::new(),
        ..Default::default()
    }
}

fn rtp(sequence_number: u16) -> Vec<u8> {
    Packet {
        header: Header {
            version: 2,
            payload_type: 102,
            sequence_number,
            ssrc: 42,
            ..Default::default()
        },
        payload: bytes::Bytes::from_static(&[0x65, 0x88, 0x84]),
    }
    .marshal()
    .unwrap()
    .to_vec()
}

/// A viewer that only wants to receive video, as a browser would offer
async fn viewer() -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await
    .unwrap();
    pc
}

#[tokio::test]
async fn test_published_rtp_reaches_track() {
    let transport = Arc::new(WebRtcTransport::new().unwrap());
    let registry = StreamRegistry::new(relay_config(47210, 47211), transport).unwrap();

    let info = registry
        .create_stream("cam1", vec![IpAddr::from([127, 0, 0, 1])])
        .await
        .unwrap();
    let stream = registry.get_stream(&info.id).await.unwrap();
    assert_eq!(stream.state(), StreamState::Listening);

    let publisher = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for seq in 0..10 {
        publisher
            .send_to(&rtp(seq), ("127.0.0.1", info.port))
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        while stream.stats().packets_forwarded < 10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("packets were not forwarded");

    registry.shutdown().await;
    assert_eq!(stream.state(), StreamState::Stopped);
}

#[tokio::test]
async fn test_negotiates_browser_offer() {
    let config = relay_config(47220, 47220);
    let transport = Arc::new(WebRtcTransport::new().unwrap());
    let negotiator = PeerSessionNegotiator::new(transport.clone(), &config);
    let registry = StreamRegistry::new(config, transport).unwrap();

    let info = registry.create_stream("cam1", vec![]).await.unwrap();
    let stream = registry.get_stream(&info.id).await.unwrap();

    let viewer = viewer().await;
    let offer = viewer.create_offer(None).await.unwrap();
    viewer.set_local_description(offer.clone()).await.unwrap();

    let answer = negotiator
        .create_peer(&stream, SessionDescription::offer(offer.sdp))
        .await
        .unwrap();
    assert_eq!(answer.kind, SdpType::Answer);
    assert!(answer.sdp.contains("m=video"));

    // The stream keeps the negotiated connection alive
    assert_eq!(stream.peer_count(), 1);

    let remote = RTCSessionDescription::answer(answer.sdp).unwrap();
    viewer.set_remote_description(remote).await.unwrap();

    assert!(registry.remove_stream("cam1").await);
    assert_eq!(stream.peer_count(), 0);

    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_garbage_offer_is_negotiation_failure() {
    let config = relay_config(47230, 47230);
    let transport = Arc::new(WebRtcTransport::new().unwrap());
    let negotiator = PeerSessionNegotiator::new(transport.clone(), &config);
    let registry = StreamRegistry::new(config, transport).unwrap();

    let info = registry.create_stream("cam1", vec![]).await.unwrap();
    let stream = registry.get_stream(&info.id).await.unwrap();

    let result = negotiator
        .create_peer(&stream, SessionDescription::offer("definitely not sdp"))
        .await;
    assert!(matches!(
        result,
        Err(chakra_core::Error::NegotiationFailure(_))
    ));
    assert_eq!(stream.active_connections(), 0);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_removed_stream_port_reused() {
    let transport = Arc::new(WebRtcTransport::new().unwrap());
    let registry = StreamRegistry::new(relay_config(47240, 47240), transport).unwrap();

    let first = registry.create_stream("cam1", vec![]).await.unwrap();
    assert!(registry.remove_stream("cam1").await);

    let second = registry.create_stream("cam2", vec![]).await.unwrap();
    assert_eq!(first.port, second.port);
    registry.shutdown().await;
}
