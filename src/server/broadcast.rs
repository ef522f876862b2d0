//! Event fan-out to connected observers
//!
//! Serialize once, write to every sink, silently drop observers whose
//! channel is gone. Best-effort per observer: one dead client never affects
//! the others.

use tracing::debug;

use crate::protocol::{encode, Envelope};

/// Observer sinks. Each sink is the sending half of a per-connection byte
/// channel; a dedicated writer task drains it onto the socket.
pub struct Broadcaster {
    sinks: Vec<flume::Sender<Vec<u8>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn attach(&mut self, sink: flume::Sender<Vec<u8>>) {
        self.sinks.push(sink);
    }

    pub fn observer_count(&self) -> usize {
        self.sinks.len()
    }

    /// Fan an event out to all connected observers.
    pub fn broadcast(&mut self, event: &Envelope) {
        let bytes = match encode(event) {
            Ok(b) => b,
            Err(e) => {
                debug!("unencodable event dropped: {}", e);
                return;
            }
        };
        let before = self.sinks.len();
        self.sinks.retain(|sink| sink.send(bytes.clone()).is_ok());
        let dropped = before - self.sinks.len();
        if dropped > 0 {
            debug!("pruned {} disconnected observer(s)", dropped);
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
