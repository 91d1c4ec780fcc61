//! Multi-node routing for the Chakra relay
//!
//! Every node owns the streams it created. Viewer negotiations for a stream on
//! another node travel over a pub/sub fabric (Redis, or an in-process bus for a
//! single node), and the control plane is exposed over gRPC.

pub mod error;
pub mod grpc;
pub mod router;
pub mod sync;

pub use error::{Error, Result};
pub use router::{NodeRecord, NodeRouter, DEFAULT_REQUEST_TIMEOUT};
