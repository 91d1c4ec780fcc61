//! Relay runtime configuration

use chakra_core::config::RelaySettings;
use chakra_core::{Error, HostPolicy, Result};
use std::net::IpAddr;
use std::time::Duration;

/// Parsed relay settings with typed addresses and durations
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_address: IpAddr,
    pub start_port: u16,
    pub end_port: u16,
    pub host_policy: HostPolicy,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub ice_gathering_timeout: Duration,
    pub stun_servers: Vec<String>,
    pub max_datagram_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            start_port: 5000,
            end_port: 5100,
            host_policy: HostPolicy::default(),
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            ice_gathering_timeout: Duration::from_secs(10),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            max_datagram_size: 4096,
        }
    }
}

impl TryFrom<&RelaySettings> for RelayConfig {
    type Error = Error;

    fn try_from(settings: &RelaySettings) -> Result<Self> {
        let bind_address = settings.bind_address.parse().map_err(|_| {
            Error::InvalidInput(format!(
                "relay bind address '{}' is not an IP address",
                settings.bind_address
            ))
        })?;

        Ok(Self {
            bind_address,
            start_port: settings.start_port,
            end_port: settings.end_port,
            host_policy: settings.host_policy,
            idle_timeout: Duration::from_secs(settings.idle_timeout_seconds),
            sweep_interval: Duration::from_secs(settings.sweep_interval_seconds),
            ice_gathering_timeout: Duration::from_secs(settings.ice_gathering_timeout_seconds),
            stun_servers: settings.stun_servers.clone(),
            max_datagram_size: settings.max_datagram_size,
        })
    }
}
