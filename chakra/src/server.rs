//! Server lifecycle management
//!
//! Starts the HTTP (REST + signaling) and gRPC servers, the idle sweep and
//! the node router, then tears everything down on SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chakra_api::http::{create_router, AppState};
use chakra_cluster::sync::MessageBus;
use chakra_cluster::NodeRouter;
use chakra_core::Config;
use chakra_relay::{PeerSessionNegotiator, StreamRegistry};

/// How long background tasks get to finish after shutdown is signalled
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct ChakraServer {
    config: Config,
    registry: Arc<StreamRegistry>,
    negotiator: Arc<PeerSessionNegotiator>,
    router: Arc<NodeRouter>,
    bus: Arc<dyn MessageBus>,
    shutdown: CancellationToken,
}

impl ChakraServer {
    pub fn new(
        config: Config,
        registry: Arc<StreamRegistry>,
        negotiator: Arc<PeerSessionNegotiator>,
        router: Arc<NodeRouter>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            config,
            registry,
            negotiator,
            router,
            bus,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start all servers and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let sweep_handle = self.registry.start_idle_sweep(self.shutdown.child_token());
        let router_handle = self.router.start().await?;
        let grpc_handle = self.start_grpc_server();
        let http_handle = self.start_http_server().await?;

        info!(node_id = %self.router.node_id(), "All servers started successfully");

        tokio::select! {
            _ = grpc_handle => {
                error!("gRPC server stopped unexpectedly");
            }
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        self.shutdown(vec![sweep_handle, router_handle]).await;
        Ok(())
    }

    async fn shutdown(&self, tasks: Vec<JoinHandle<()>>) {
        info!("Shutting down Chakra relay...");

        // 1. Stop accepting requests and stop background loops
        self.shutdown.cancel();
        self.router.shutdown();
        self.bus.shutdown();

        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Background task did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }

        // 2. Stop every stream and release its port
        let streams = self.registry.list_streams().await.len();
        info!("Stopping {} active stream(s)...", streams);
        self.registry.shutdown().await;

        info!("Chakra relay shut down complete");
    }

    fn start_grpc_server(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let router = self.router.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if let Err(e) = chakra_api::grpc::serve(&config, router, shutdown).await {
                error!("gRPC server error: {:#}", e);
            }
        })
    }

    /// Start HTTP server with graceful shutdown support
    async fn start_http_server(&self) -> anyhow::Result<JoinHandle<()>> {
        let http_addr: SocketAddr = self
            .config
            .http_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.config.http_address()))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        if self.config.auth.token.is_empty() {
            warn!("Stream management API is unauthenticated (no auth token configured)");
        }

        let state = AppState::new(
            self.registry.clone(),
            self.negotiator.clone(),
            self.config.auth.token.clone(),
        );
        let app = create_router(state);
        let shutdown = self.shutdown.clone();

        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        }))
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
