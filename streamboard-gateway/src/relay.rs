//! Producer/consumer broadcast relay.
//!
//! The degenerate case of the gateway pattern: no upstream and no channel
//! filtering. Producer sessions feed frames in; every consumer session in
//! the open state receives each frame verbatim, best-effort, with no
//! buffering or transformation. The relay is payload-agnostic -- it never
//! parses what producers send.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use streamboard_core::SessionId;

/// One relay frame, forwarded exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Vec<u8>),
}

pub type RelaySender = mpsc::UnboundedSender<RelayFrame>;

#[derive(Default)]
pub struct RelayHub {
    producers: DashMap<SessionId, ()>,
    consumers: DashMap<SessionId, RelaySender>,
}

impl RelayHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a producer connection. Producers have no outbound queue; the
    /// entry exists for counts and cleanup logging.
    pub fn add_producer(&self) -> SessionId {
        let id = SessionId::generate();
        self.producers.insert(id.clone(), ());
        info!(session_id = %id, "Producer connected");
        id
    }

    pub fn remove_producer(&self, id: &SessionId) {
        if self.producers.remove(id).is_some() {
            info!(session_id = %id, "Producer disconnected");
        }
    }

    /// Add a consumer and return its frame stream.
    pub fn add_consumer(&self) -> (SessionId, mpsc::UnboundedReceiver<RelayFrame>) {
        let id = SessionId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers.insert(id.clone(), tx);
        info!(session_id = %id, "Consumer connected");
        (id, rx)
    }

    pub fn remove_consumer(&self, id: &SessionId) {
        if self.consumers.remove(id).is_some() {
            info!(session_id = %id, "Consumer disconnected");
        }
    }

    /// Forward one producer frame to every open consumer. A consumer whose
    /// queue is gone is dropped from the set without affecting the others.
    /// Returns the number of consumers reached.
    pub fn broadcast(&self, frame: &RelayFrame) -> usize {
        let mut sent_count = 0;
        let mut failed = Vec::new();

        for entry in self.consumers.iter() {
            if entry.value().send(frame.clone()).is_ok() {
                sent_count += 1;
            } else {
                warn!(session_id = %entry.key(), "Consumer gone, dropping from set");
                failed.push(entry.key().clone());
            }
        }

        for id in failed {
            self.remove_consumer(&id);
        }

        debug!(consumers = sent_count, "Relay frame forwarded");
        sent_count
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}
