//! A single ingest session: one UDP socket feeding one shared outbound track

use crate::access::AllowList;
use crate::tracker::{ConnectionTracker, Transition};
use crate::transport::{ConnectionState, OutboundTrack, RtcPeerConnection, StateChangeHandler};
use crate::types::{PeerId, StreamId, StreamInfo, StreamState};
use chakra_core::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::Unmarshal;

/// Upper bound on waiting for the ingest loop to exit after a stop
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Forwarding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub packets_malformed: u64,
}

#[derive(Default)]
struct StatsInner {
    packets_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    packets_malformed: AtomicU64,
}

/// Viewer bookkeeping. Guarded by one lock so eviction and attach exclude each other.
#[derive(Debug, Default)]
struct Occupancy {
    active: u32,
    /// Negotiations in flight
    pending: u32,
    /// Set once the stream has been chosen for teardown; refuses further attaches
    retired: bool,
}

/// Blocks eviction of a stream while a viewer negotiates against it
pub struct AttachGuard {
    stream: Arc<Stream>,
}

impl AttachGuard {
    #[must_use]
    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        let mut occupancy = self.stream.occupancy.lock();
        occupancy.pending = occupancy.pending.saturating_sub(1);
    }
}

pub struct Stream {
    id: StreamId,
    name: String,
    bind_address: IpAddr,
    port: u16,
    max_datagram_size: usize,
    allow_list: AllowList,
    track: Arc<dyn OutboundTrack>,
    created_at: DateTime<Utc>,

    state: RwLock<StreamState>,
    last_frame_at: RwLock<Instant>,
    occupancy: Mutex<Occupancy>,
    peers: Mutex<HashMap<PeerId, Arc<dyn RtcPeerConnection>>>,
    stats: StatsInner,

    cancel: CancellationToken,
    stopped: AtomicBool,
    ingest: Mutex<Option<JoinHandle<()>>>,
}

impl Stream {
    pub fn new(
        id: StreamId,
        name: String,
        bind_address: IpAddr,
        port: u16,
        max_datagram_size: usize,
        allow_list: AllowList,
        track: Arc<dyn OutboundTrack>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            bind_address,
            port,
            max_datagram_size,
            allow_list,
            track,
            created_at: Utc::now(),
            state: RwLock::new(StreamState::Created),
            last_frame_at: RwLock::new(Instant::now()),
            occupancy: Mutex::new(Occupancy::default()),
            peers: Mutex::new(HashMap::new()),
            stats: StatsInner::default(),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            ingest: Mutex::new(None),
        })
    }

    /// Bind the ingest socket and launch the ingest loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() != StreamState::Created {
            return Err(Error::InvalidInput(format!(
                "stream {} has already been started",
                self.id
            )));
        }

        let addr = SocketAddr::new(self.bind_address, self.port);
        let socket = UdpSocket::bind(addr).await.map_err(|source| Error::BindFailure {
            port: self.port,
            source,
        })?;

        *self.state.write() = StreamState::Listening;

        let stream = Arc::clone(self);
        let handle = tokio::spawn(async move { stream.ingest(socket).await });
        *self.ingest.lock() = Some(handle);

        info!(stream_id = %self.id, name = %self.name, port = self.port, "Stream listening");
        Ok(())
    }

    async fn ingest(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = vec![0u8; self.max_datagram_size];

        loop {
            let (len, source) = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(stream_id = %self.id, "Ingest loop cancelled");
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        error!(stream_id = %self.id, port = self.port, error = %e, "Ingest socket failed");
                        *self.state.write() = StreamState::Stopped;
                        break;
                    }
                },
            };

            if !self.allow_list.is_allowed(source.ip()) {
                continue;
            }

            let packet = match Packet::unmarshal(&mut &buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    self.stats.packets_malformed.fetch_add(1, Ordering::Relaxed);
                    debug!(stream_id = %self.id, %source, len, error = %e, "Dropping malformed RTP packet");
                    continue;
                }
            };

            *self.last_frame_at.write() = Instant::now();

            match self.track.write_rtp(&packet).await {
                Ok(()) => {
                    self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_forwarded.fetch_add(len as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    trace!(stream_id = %self.id, error = %e, "Failed to forward RTP packet");
                }
            }
        }

        info!(stream_id = %self.id, port = self.port, "Ingest loop stopped");
    }

    /// Stop ingesting and close the socket. Returns `false` if already stopped.
    ///
    /// The socket is closed by the time this returns, so the port can be reused.
    pub async fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            warn!(stream_id = %self.id, "Stream already stopped");
            return false;
        }

        self.cancel.cancel();

        let handle = self.ingest.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!(stream_id = %self.id, "Ingest loop did not exit in time, aborting");
                abort.abort();
            }
        }

        let peers: Vec<_> = self.peers.lock().drain().collect();
        for (peer_id, connection) in &peers {
            if let Err(e) = connection.close().await {
                debug!(stream_id = %self.id, peer_id = %peer_id, error = %e, "Failed to close viewer connection");
            }
        }

        *self.state.write() = StreamState::Stopped;
        debug!(stream_id = %self.id, port = self.port, viewers = peers.len(), "Stream stopped");
        true
    }

    /// Take ownership of a negotiated viewer connection.
    ///
    /// Returns `false` once the stream has stopped; the connection is then
    /// left to the caller to close.
    pub fn add_peer(&self, peer_id: PeerId, connection: Arc<dyn RtcPeerConnection>) -> bool {
        let mut peers = self.peers.lock();
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        peers.insert(peer_id, connection);
        debug!(stream_id = %self.id, peers = peers.len(), "Viewer connection added");
        true
    }

    pub fn remove_peer(&self, peer_id: &PeerId) -> Option<Arc<dyn RtcPeerConnection>> {
        self.peers.lock().remove(peer_id)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Reserve the stream for a viewer negotiation. `None` once it is being torn down.
    pub fn begin_attach(self: &Arc<Self>) -> Option<AttachGuard> {
        let mut occupancy = self.occupancy.lock();
        if occupancy.retired || self.state() == StreamState::Stopped {
            return None;
        }
        occupancy.pending += 1;
        Some(AttachGuard {
            stream: Arc::clone(self),
        })
    }

    pub fn connection_opened(&self) {
        let mut occupancy = self.occupancy.lock();
        occupancy.active += 1;
        debug!(stream_id = %self.id, active = occupancy.active, "Viewer connected");
    }

    pub fn connection_closed(&self) {
        let mut occupancy = self.occupancy.lock();
        occupancy.active = occupancy.active.saturating_sub(1);
        debug!(stream_id = %self.id, active = occupancy.active, "Viewer disconnected");
    }

    /// State observer for one viewer connection.
    ///
    /// A failed connection is closed and dropped from the stream; a closed
    /// one is only dropped.
    pub fn connection_observer(self: &Arc<Self>, peer_id: PeerId) -> StateChangeHandler {
        let stream = Arc::downgrade(self);
        let tracker = ConnectionTracker::new();

        Box::new(move |state| {
            let Some(stream) = stream.upgrade() else {
                return;
            };
            match tracker.observe(state) {
                Transition::Opened => stream.connection_opened(),
                Transition::Closed => stream.connection_closed(),
                Transition::Unchanged => {}
            }

            match state {
                ConnectionState::Failed => {
                    if let Some(connection) = stream.remove_peer(&peer_id) {
                        let stream_id = stream.id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = connection.close().await {
                                warn!(stream_id = %stream_id, error = %e, "Failed to close failed viewer connection");
                            }
                        });
                    }
                }
                ConnectionState::Closed => {
                    stream.remove_peer(&peer_id);
                }
                _ => {}
            }
        })
    }

    /// Mark the stream retired if it has no viewers and has been idle (or has
    /// stopped on its own). Checked and set under the occupancy lock.
    pub fn try_retire_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        let mut occupancy = self.occupancy.lock();
        if occupancy.retired || occupancy.active > 0 || occupancy.pending > 0 {
            return false;
        }

        let idle_for = now.saturating_duration_since(*self.last_frame_at.read());
        if self.state() == StreamState::Stopped || idle_for > idle_timeout {
            occupancy.retired = true;
            return true;
        }
        false
    }

    pub fn retire(&self) {
        self.occupancy.lock().retired = true;
    }

    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    #[must_use]
    pub fn track(&self) -> Arc<dyn OutboundTrack> {
        Arc::clone(&self.track)
    }

    #[must_use]
    pub const fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    #[must_use]
    pub fn active_connections(&self) -> u32 {
        self.occupancy.lock().active
    }

    #[must_use]
    pub fn last_frame_at(&self) -> Instant {
        *self.last_frame_at.read()
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            packets_forwarded: self.stats.packets_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.stats.bytes_forwarded.load(Ordering::Relaxed),
            packets_malformed: self.stats.packets_malformed.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            port: self.port,
            state: self.state(),
            active_connections: self.active_connections(),
            created_at: self.created_at,
        }
    }
}
