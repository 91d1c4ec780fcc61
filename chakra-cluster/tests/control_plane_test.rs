// Integration tests for the control plane
//
// Two nodes share an in-process bus. A gRPC client talks to node A only and
// negotiates a viewer on a stream owned by node B.

use chakra_cluster::grpc::proto::{CreatePeerRequest, CreateStreamRequest};
use chakra_cluster::grpc::{
    ClusterAuthInterceptor, ControlPlaneClient, ControlPlaneServer, ControlPlaneService,
    AUTH_SECRET_METADATA_KEY,
};
use chakra_cluster::sync::{LocalBus, MessageBus};
use chakra_cluster::{NodeRecord, NodeRouter, DEFAULT_REQUEST_TIMEOUT};
use chakra_relay::{PeerSessionNegotiator, RelayConfig, StreamRegistry, WebRtcTransport};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::Request;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

const SECRET: &str = "cluster-secret";

async fn node(node_id: &str, bus: Arc<dyn MessageBus>, port: u16) -> Arc<NodeRouter> {
    let config = RelayConfig {
        bind_address: IpAddr::from([127, 0, 0, 1]),
        start_port: port,
        end_port: port + 1,
        ice_gathering_timeout: Duration::from_secs(5),
        stun_servers: Vec::new(),
        ..Default::default()
    };
    let transport = Arc::new(WebRtcTransport::new().unwrap());
    let negotiator = Arc::new(PeerSessionNegotiator::new(transport.clone(), &config));
    let registry = StreamRegistry::new(config, transport).unwrap();
    let router = NodeRouter::new(
        NodeRecord {
            node_id: node_id.to_string(),
            grpc_address: String::new(),
        },
        bus,
        registry,
        negotiator,
        DEFAULT_REQUEST_TIMEOUT,
    );
    router.start().await.unwrap();
    router
}

/// Serve the control plane on an ephemeral port and return its address
async fn serve(router: Arc<NodeRouter>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let auth = ClusterAuthInterceptor::new(SECRET.to_string());
    let service = ControlPlaneServer::with_interceptor(
        ControlPlaneService::new(router),
        move |req| auth.validate(req),
    );

    tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

async fn client(addr: SocketAddr) -> ControlPlaneClient<Channel> {
    ControlPlaneClient::connect(format!("http://{addr}")).await.unwrap()
}

fn authed<T>(message: T) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(AUTH_SECRET_METADATA_KEY, SECRET.parse().unwrap());
    request
}

async fn recvonly_offer() -> String {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap();
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await
    .unwrap();
    let offer = pc.create_offer(None).await.unwrap();
    pc.close().await.unwrap();
    offer.sdp
}

#[tokio::test]
async fn test_requests_without_secret_are_rejected() {
    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
    let a = node("node-a", bus, 47510).await;
    let mut client = client(serve(a).await).await;

    let status = client
        .create_stream(CreateStreamRequest {
            name: "cam1".to_string(),
            allowed_hosts: vec![],
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unauthenticated);
}

#[tokio::test]
async fn test_viewer_negotiated_on_owning_node() {
    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
    let a = node("node-a", bus.clone(), 47520).await;
    let b = node("node-b", bus, 47530).await;
    let mut client_a = client(serve(a.clone()).await).await;
    let mut client_b = client(serve(b.clone()).await).await;

    let created = client_b
        .create_stream(authed(CreateStreamRequest {
            name: "cam1".to_string(),
            allowed_hosts: vec!["127.0.0.1".to_string()],
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(created.node_id, "node-b");

    // Node A has no such stream; the request is relayed to node B
    let answer = client_a
        .create_peer(authed(CreatePeerRequest {
            node_id: created.node_id.clone(),
            stream_id: created.stream_id.clone(),
            offer_sdp: recvonly_offer().await,
        }))
        .await
        .unwrap()
        .into_inner();

    assert!(RTCSessionDescription::answer(answer.answer_sdp.clone()).is_ok());
    assert!(answer.answer_sdp.contains("a=candidate"));
    assert!(a.registry().list_streams().await.is_empty());

    let status = client_a
        .create_peer(authed(CreatePeerRequest {
            node_id: "node-b".to_string(),
            stream_id: "missing".to_string(),
            offer_sdp: "v=0".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::NotFound);

    a.shutdown();
    b.shutdown();
    b.registry().shutdown().await;
}
