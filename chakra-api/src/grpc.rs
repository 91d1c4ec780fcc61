//! Control-plane gRPC server setup

use anyhow::Context;
use chakra_cluster::grpc::{ClusterAuthInterceptor, ControlPlaneServer, ControlPlaneService};
use chakra_cluster::NodeRouter;
use chakra_core::config::TlsConfig;
use chakra_core::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::info;

/// Serve the control plane until `shutdown` fires
pub async fn serve(
    config: &Config,
    router: Arc<NodeRouter>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .grpc_address()
        .parse()
        .with_context(|| format!("invalid gRPC address '{}'", config.grpc_address()))?;

    let auth = ClusterAuthInterceptor::new(config.auth.cluster_secret.clone());
    let service = ControlPlaneServer::with_interceptor(
        ControlPlaneService::new(router),
        move |req| auth.validate(req),
    );

    let mut server = Server::builder();
    if config.tls.max_connection_age_seconds > 0 {
        server = server.max_connection_age(Duration::from_secs(config.tls.max_connection_age_seconds));
    }

    let tls = load_tls(&config.tls)?;
    let tls_enabled = tls.is_some();
    if let Some(tls) = tls {
        server = server.tls_config(tls).context("invalid gRPC TLS configuration")?;
    }

    if config.auth.cluster_secret.is_empty() {
        info!("Control-plane authentication disabled (no cluster secret)");
    }
    info!(%addr, tls = tls_enabled, "gRPC server listening");

    server
        .add_service(service)
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await?;

    info!("gRPC server shut down gracefully");
    Ok(())
}

/// Read the server identity from PEM files, if configured
pub fn load_tls(tls: &TlsConfig) -> anyhow::Result<Option<ServerTlsConfig>> {
    match (&tls.cert_path, &tls.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert = std::fs::read(cert_path)
                .with_context(|| format!("failed to read TLS certificate {cert_path}"))?;
            let key = std::fs::read(key_path)
                .with_context(|| format!("failed to read TLS key {key_path}"))?;
            Ok(Some(
                ServerTlsConfig::new().identity(Identity::from_pem(cert, key)),
            ))
        }
        (None, None) => Ok(None),
        _ => anyhow::bail!("tls.cert_path and tls.key_path must be set together"),
    }
}
