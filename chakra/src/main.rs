mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use chakra_cluster::sync::{LocalBus, MessageBus, RedisBus};
use chakra_cluster::{NodeRecord, NodeRouter, DEFAULT_REQUEST_TIMEOUT};
use chakra_core::config::generate_node_id;
use chakra_core::{logging, Config};
use chakra_relay::{PeerSessionNegotiator, RelayConfig, StreamRegistry, WebRtcTransport};

use server::ChakraServer;

#[derive(Parser, Debug)]
#[command(name = "chakra")]
#[command(about = "RTP to WebRTC media relay", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "CHAKRA_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    // 1.5. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;

    if config.node.id.is_empty() {
        config.node.id = generate_node_id();
    }
    info!(node_id = %config.node.id, "Chakra relay starting...");
    info!("HTTP address: {}", config.http_address());
    info!("gRPC address: {}", config.grpc_address());

    // 3. Relay core
    let relay_config = RelayConfig::try_from(&config.relay)?;
    info!(
        start_port = relay_config.start_port,
        end_port = relay_config.end_port,
        host_policy = ?relay_config.host_policy,
        "Relay port range configured"
    );
    let transport = Arc::new(WebRtcTransport::new()?);
    let negotiator = Arc::new(PeerSessionNegotiator::new(transport.clone(), &relay_config));
    let registry = StreamRegistry::new(relay_config, transport)?;

    // 4. Message bus
    let bus: Arc<dyn MessageBus> = if config.is_clustered() {
        info!("Redis configured, joining cluster");
        Arc::new(RedisBus::new(&config.redis.url)?)
    } else {
        info!("Redis not configured, running as a single node");
        Arc::new(LocalBus::new())
    };

    // 5. Node router
    let grpc_address = if config.node.advertise_address.is_empty() {
        config.grpc_address()
    } else {
        config.node.advertise_address.clone()
    };
    let router = NodeRouter::new(
        NodeRecord {
            node_id: config.node.id.clone(),
            grpc_address,
        },
        bus.clone(),
        registry.clone(),
        negotiator.clone(),
        DEFAULT_REQUEST_TIMEOUT,
    );

    ChakraServer::new(config, registry, negotiator, router, bus)
        .start()
        .await
}
