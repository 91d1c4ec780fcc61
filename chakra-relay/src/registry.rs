//! Stream registry
//!
//! Owns every live stream together with the port allocator. Creation, removal
//! and idle eviction all run under one async mutex, so a port is never handed
//! out while the socket of its previous owner is still open.

use crate::access::AllowList;
use crate::config::RelayConfig;
use crate::port::PortAllocator;
use crate::stream::Stream;
use crate::transport::RtcTransport;
use crate::types::{StreamId, StreamInfo};
use chakra_core::{Error, Result};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct RegistryInner {
    ports: PortAllocator,
    by_id: HashMap<StreamId, Arc<Stream>>,
    by_name: HashMap<String, StreamId>,
}

impl RegistryInner {
    /// Stop the stream, release its port and drop both index entries.
    async fn teardown(&mut self, stream: &Arc<Stream>) {
        stream.retire();
        stream.stop().await;
        self.ports.release(stream.port());
        self.by_id.remove(stream.id());
        if self.by_name.get(stream.name()) == Some(stream.id()) {
            self.by_name.remove(stream.name());
        }
    }
}

pub struct StreamRegistry {
    inner: Mutex<RegistryInner>,
    transport: Arc<dyn RtcTransport>,
    config: RelayConfig,
}

impl StreamRegistry {
    pub fn new(config: RelayConfig, transport: Arc<dyn RtcTransport>) -> Result<Arc<Self>> {
        let ports = PortAllocator::new(config.start_port, config.end_port)?;

        info!(
            start_port = config.start_port,
            end_port = config.end_port,
            policy = ?config.host_policy,
            "Stream registry created"
        );

        Ok(Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                ports,
                by_id: HashMap::new(),
                by_name: HashMap::new(),
            }),
            transport,
            config,
        }))
    }

    /// Allocate a port and start relaying a new stream.
    pub async fn create_stream(&self, name: &str, allowed_hosts: Vec<IpAddr>) -> Result<StreamInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("stream name is required".to_string()));
        }

        let mut inner = self.inner.lock().await;

        if inner.by_name.contains_key(name) {
            return Err(Error::Conflict(format!("stream '{name}' is already registered")));
        }

        let port = inner.ports.allocate()?;
        let id = StreamId::generate();

        let track = match self.transport.create_track(&id).await {
            Ok(track) => track,
            Err(e) => {
                inner.ports.release(port);
                return Err(e);
            }
        };

        let stream = Stream::new(
            id.clone(),
            name.to_string(),
            self.config.bind_address,
            port,
            self.config.max_datagram_size,
            AllowList::new(self.config.host_policy, allowed_hosts),
            track,
        );

        if let Err(e) = stream.start().await {
            warn!(stream_id = %id, port, error = %e, "Failed to start stream");
            inner.ports.release(port);
            return Err(e);
        }

        inner.by_name.insert(name.to_string(), id.clone());
        inner.by_id.insert(id.clone(), Arc::clone(&stream));

        info!(stream_id = %id, name, port, "Stream created");
        Ok(stream.info())
    }

    pub async fn get_stream(&self, id: &StreamId) -> Option<Arc<Stream>> {
        self.inner.lock().await.by_id.get(id).cloned()
    }

    pub async fn get_stream_by_name(&self, name: &str) -> Option<Arc<Stream>> {
        let inner = self.inner.lock().await;
        inner
            .by_name
            .get(name.trim())
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Tear down the named stream. Returns `false` if it does not exist.
    pub async fn remove_stream(&self, name: &str) -> bool {
        let name = name.trim();
        let mut inner = self.inner.lock().await;

        let Some(stream) = inner
            .by_name
            .get(name)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
        else {
            return false;
        };

        inner.teardown(&stream).await;
        info!(stream_id = %stream.id(), name, port = stream.port(), "Stream removed");
        true
    }

    pub async fn list_streams(&self) -> Vec<StreamInfo> {
        let inner = self.inner.lock().await;
        let mut streams: Vec<_> = inner.by_id.values().map(|s| s.info()).collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        streams
    }

    /// Evict every stream that is idle as of `now`. Returns the evicted ids.
    pub async fn sweep_idle_at(&self, now: Instant) -> Vec<StreamId> {
        let mut inner = self.inner.lock().await;

        let idle: Vec<Arc<Stream>> = inner
            .by_id
            .values()
            .filter(|s| s.try_retire_idle(now.into_std(), self.config.idle_timeout))
            .cloned()
            .collect();

        let mut evicted = Vec::with_capacity(idle.len());
        for stream in idle {
            inner.teardown(&stream).await;
            info!(stream_id = %stream.id(), name = stream.name(), port = stream.port(), "Evicted idle stream");
            evicted.push(stream.id().clone());
        }
        evicted
    }

    /// Run the idle sweep every `sweep_interval` until `cancel` fires.
    pub fn start_idle_sweep(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?period, idle_timeout = ?registry.config.idle_timeout, "Starting idle sweep");

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.sweep_idle_at(Instant::now()).await;
                        if !evicted.is_empty() {
                            debug!(count = evicted.len(), "Idle sweep finished");
                        }
                    }
                }
            }

            info!("Idle sweep stopped");
        })
    }

    /// Stop every stream and release every port.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let streams: Vec<_> = inner.by_id.values().cloned().collect();
        for stream in &streams {
            inner.teardown(stream).await;
        }
        info!(count = streams.len(), "All streams stopped");
    }

    /// Ports currently held by live streams
    pub async fn ports_in_use(&self) -> usize {
        self.inner.lock().await.ports.in_use()
    }

    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn RtcTransport> {
        Arc::clone(&self.transport)
    }
}
