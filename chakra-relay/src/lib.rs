//! Chakra RTP relay
//!
//! Accepts a live RTP feed on a dedicated UDP port per named stream and fans it
//! out to any number of WebRTC viewers.
//!
//! ## Architecture
//!
//! - **`PortAllocator`**: issues ports from a bounded range, lowest released port first
//! - **`Stream`**: one UDP ingest socket writing into one shared outbound track
//! - **`StreamRegistry`**: owns live streams, indexed by id and name, and evicts idle ones
//! - **`PeerSessionNegotiator`**: answers a viewer's SDP offer with the stream's track attached
//! - **`RtcTransport`**: the real-time transport capability, backed by webrtc-rs in production
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chakra_relay::{PeerSessionNegotiator, RelayConfig, StreamRegistry, WebRtcTransport};
//!
//! let config = RelayConfig::default();
//! let transport = Arc::new(WebRtcTransport::new()?);
//! let registry = StreamRegistry::new(config.clone(), transport.clone())?;
//! let negotiator = PeerSessionNegotiator::new(transport, &config);
//!
//! let info = registry.create_stream("cam1", vec![]).await?;
//! let stream = registry.get_stream(&info.id).await.unwrap();
//! let answer = negotiator.create_peer(&stream, offer).await?;
//! ```

mod access;
mod config;
mod negotiator;
mod port;
mod registry;
mod rtc;
mod stream;
mod tracker;
mod transport;
mod types;

#[cfg(test)]
mod test_helpers;

pub use access::AllowList;
pub use config::RelayConfig;
pub use negotiator::PeerSessionNegotiator;
pub use port::PortAllocator;
pub use registry::StreamRegistry;
pub use rtc::WebRtcTransport;
pub use stream::{AttachGuard, Stream, StreamStats};
pub use tracker::{ConnectionTracker, Transition};
pub use transport::{
    ConnectionConfig, ConnectionState, GatheringComplete, OutboundTrack, RtcPeerConnection,
    RtcTransport, SdpType, SessionDescription, StateChangeHandler,
};
pub use types::{PeerId, StreamId, StreamInfo, StreamState};
