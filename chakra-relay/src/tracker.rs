//! Per-connection state tracking for viewer counting

use crate::transport::ConnectionState;
use parking_lot::Mutex;

/// Effect of a state change on a stream's viewer count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Entered `Connected`
    Opened,
    /// Left `Connected`
    Closed,
    Unchanged,
}

/// Remembers the last state of one peer connection so that repeated or
/// out-of-order callbacks count each connect and disconnect exactly once.
#[derive(Debug)]
pub struct ConnectionTracker {
    previous: Mutex<ConnectionState>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            previous: Mutex::new(ConnectionState::New),
        }
    }

    pub fn observe(&self, next: ConnectionState) -> Transition {
        let mut previous = self.previous.lock();
        let was_connected = *previous == ConnectionState::Connected;
        let is_connected = next == ConnectionState::Connected;
        *previous = next;

        match (was_connected, is_connected) {
            (false, true) => Transition::Opened,
            (true, false) => Transition::Closed,
            _ => Transition::Unchanged,
        }
    }

    #[must_use]
    pub fn current(&self) -> ConnectionState {
        *self.previous.lock()
    }
}
