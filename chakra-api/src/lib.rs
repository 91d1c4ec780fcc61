//! External surfaces of the Chakra relay: the stream management REST API,
//! the viewer signaling WebSocket and the control-plane gRPC server.

pub mod grpc;
pub mod http;
