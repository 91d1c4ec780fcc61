//! Control-plane gRPC server implementation

use std::net::IpAddr;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::info;

use super::proto::control_plane_server::ControlPlane;
use super::proto::{CreatePeerRequest, CreatePeerResponse, CreateStreamRequest, CreateStreamResponse};
use crate::router::NodeRouter;
use chakra_relay::{SessionDescription, StreamId};

/// Stream creation and cross-node viewer negotiation for control-plane clients
#[derive(Clone)]
pub struct ControlPlaneService {
    router: Arc<NodeRouter>,
}

impl ControlPlaneService {
    #[must_use]
    pub const fn new(router: Arc<NodeRouter>) -> Self {
        Self { router }
    }
}

#[allow(clippy::result_large_err)]
fn parse_hosts(hosts: &[String]) -> Result<Vec<IpAddr>, Status> {
    hosts
        .iter()
        .map(|h| {
            h.parse()
                .map_err(|_| Status::invalid_argument(format!("'{h}' is not an IP address")))
        })
        .collect()
}

#[tonic::async_trait]
impl ControlPlane for ControlPlaneService {
    async fn create_stream(
        &self,
        request: Request<CreateStreamRequest>,
    ) -> Result<Response<CreateStreamResponse>, Status> {
        let req = request.into_inner();
        if req.name.trim().is_empty() {
            return Err(Status::invalid_argument("name is required"));
        }
        let allowed_hosts = parse_hosts(&req.allowed_hosts)?;

        let info = self.router.create_stream(&req.name, allowed_hosts).await?;

        info!(
            stream_id = %info.id,
            node_id = %self.router.node_id(),
            port = info.port,
            "Stream created via control plane"
        );

        Ok(Response::new(CreateStreamResponse {
            stream_id: info.id.to_string(),
            node_id: self.router.node_id().to_string(),
            name: info.name,
            port: u32::from(info.port),
        }))
    }

    async fn create_peer(
        &self,
        request: Request<CreatePeerRequest>,
    ) -> Result<Response<CreatePeerResponse>, Status> {
        let req = request.into_inner();
        if req.stream_id.is_empty() {
            return Err(Status::invalid_argument("stream_id is required"));
        }
        if req.offer_sdp.is_empty() {
            return Err(Status::invalid_argument("offer_sdp is required"));
        }

        let answer = self
            .router
            .create_peer(
                &req.node_id,
                &StreamId::from(req.stream_id),
                SessionDescription::offer(req.offer_sdp),
            )
            .await?;

        Ok(Response::new(CreatePeerResponse {
            answer_sdp: answer.sdp,
        }))
    }
}
