pub mod bus;
pub mod dedup;
pub mod envelope;
pub mod redis_bus;

pub use bus::{LocalBus, MessageBus};
pub use dedup::MessageDeduplicator;
pub use envelope::{node_channel, CreatePeerRequest, CreatePeerResponse, Envelope, EnvelopeType, RemoteError};
pub use redis_bus::RedisBus;
