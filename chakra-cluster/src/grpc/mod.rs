//! Control-plane gRPC

pub mod auth;
pub mod server;

// Include generated protobuf code
pub mod proto {
    #![allow(clippy::all, clippy::pedantic)]
    tonic::include_proto!("chakra.control");
}

pub use auth::{ClusterAuthInterceptor, AUTH_SECRET_METADATA_KEY};
pub use proto::control_plane_client::ControlPlaneClient;
pub use proto::control_plane_server::ControlPlaneServer;
pub use server::ControlPlaneService;
