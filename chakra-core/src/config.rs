use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub node: NodeConfig,
    pub relay: RelaySettings,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub tls: TlsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Stream management API and signaling WebSocket
    pub http_port: u16,
    /// Control-plane gRPC
    pub grpc_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            grpc_port: 50051,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity used for pub/sub channel keys. Generated when empty.
    pub id: String,
    /// Address other nodes and control-plane clients use to reach this node's gRPC server
    pub advertise_address: String,
}

/// Which publishing sources a stream accepts RTP from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPolicy {
    /// Accept from any source
    Disabled,
    /// Exact-match against the allow-list; an empty list accepts any source
    #[default]
    Permissive,
    /// Exact-match against the allow-list; an empty list accepts nothing
    Strict,
}

impl HostPolicy {
    #[must_use]
    pub const fn enforces(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Address the per-stream UDP sockets bind to
    pub bind_address: String,
    pub start_port: u16,
    pub end_port: u16,
    pub host_policy: HostPolicy,
    /// Streams with no viewers and no media for this long are evicted
    pub idle_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub ice_gathering_timeout_seconds: u64,
    pub stun_servers: Vec<String>,
    /// Receive buffer for one RTP datagram
    pub max_datagram_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            start_port: 5000,
            end_port: 5100,
            host_policy: HostPolicy::default(),
            idle_timeout_seconds: 300,
            sweep_interval_seconds: 60,
            ice_gathering_timeout_seconds: 10,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            max_datagram_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Empty runs a single node with an in-process bus
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token required by the stream management API. Empty disables the check.
    pub token: String,
    /// Shared secret for the control-plane gRPC (`x-cluster-secret`). Empty disables the check.
    pub cluster_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub max_connection_age_seconds: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            max_connection_age_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // CHAKRA_RELAY__START_PORT, CHAKRA_REDIS__URL, ...
        builder = builder.add_source(
            Environment::with_prefix("CHAKRA")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("relay.stun_servers")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Check settings that would otherwise fail late at runtime
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.relay.start_port == 0 {
            errors.push("relay.start_port must be non-zero".to_string());
        }
        if self.relay.start_port > self.relay.end_port {
            errors.push(format!(
                "relay.start_port ({}) must not exceed relay.end_port ({})",
                self.relay.start_port, self.relay.end_port
            ));
        }
        if self.relay.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("relay.bind_address '{}' is not an IP address", self.relay.bind_address));
        }
        if self.relay.sweep_interval_seconds == 0 {
            errors.push("relay.sweep_interval_seconds must be non-zero".to_string());
        }
        if self.relay.ice_gathering_timeout_seconds == 0 {
            errors.push("relay.ice_gathering_timeout_seconds must be non-zero".to_string());
        }
        if self.relay.stun_servers.is_empty() {
            errors.push("relay.stun_servers needs at least one STUN server".to_string());
        }
        if self.relay.max_datagram_size < 12 {
            errors.push("relay.max_datagram_size is smaller than an RTP header".to_string());
        }
        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            errors.push("tls.cert_path and tls.key_path must be set together".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.grpc_port)
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    #[must_use]
    pub fn is_clustered(&self) -> bool {
        !self.redis.url.is_empty()
    }
}

/// Generate a unique node ID for this server instance
#[must_use]
pub fn generate_node_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{hostname}-{}", nanoid::nanoid!(6))
}
