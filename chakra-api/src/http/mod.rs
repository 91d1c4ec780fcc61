// Module: http
// Stream management REST API and the signaling WebSocket

pub mod error;
pub mod health;
pub mod signaling;
pub mod streams;

use axum::{
    routing::{get, post},
    Router,
};
use chakra_relay::{PeerSessionNegotiator, StreamRegistry};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub negotiator: Arc<PeerSessionNegotiator>,
    /// Bearer token for stream management. Empty disables the check.
    pub auth_token: Arc<String>,
}

impl AppState {
    pub fn new(
        registry: Arc<StreamRegistry>,
        negotiator: Arc<PeerSessionNegotiator>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            negotiator,
            auth_token: Arc::new(auth_token.into()),
        }
    }
}

/// Create the HTTP router with all routes
///
/// Serve with `into_make_service_with_connect_info::<SocketAddr>()`: stream
/// creation reads the caller address.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router())
        // Signaling WebSocket
        .route("/", get(signaling::signaling_handler))
        // Stream management
        .route("/streams", post(streams::create_stream))
        .route(
            "/streams/{name}",
            get(streams::get_stream).delete(streams::delete_stream),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chakra_core::HostPolicy;
    use chakra_relay::{RelayConfig, WebRtcTransport};
    use std::net::IpAddr;
    use std::time::Duration;

    pub fn state(start_port: u16, end_port: u16, token: &str, host_policy: HostPolicy) -> AppState {
        let config = RelayConfig {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            start_port,
            end_port,
            host_policy,
            ice_gathering_timeout: Duration::from_secs(5),
            stun_servers: Vec::new(),
            ..Default::default()
        };
        let transport = Arc::new(WebRtcTransport::new().unwrap());
        let negotiator = Arc::new(PeerSessionNegotiator::new(transport.clone(), &config));
        let registry = StreamRegistry::new(config, transport).unwrap();
        AppState::new(registry, negotiator, token)
    }
}
