//! Registry of live client sessions and their channel interest sets.
//!
//! Owns every session exclusively: transports get a session id and the
//! receiving half of the session's outbound queue, nothing else. All
//! channel reference counting goes through the [`SubscriptionManager`]
//! so the upstream subscription set always tracks the union of interest
//! sets.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::subscriptions::SubscriptionManager;
use streamboard_core::SessionId;

/// Transport kind of a gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Sse,
    WebSocket,
}

/// Sender half of a session's outbound queue. Frames are pre-serialized
/// by the router; the transport only writes them out.
pub type FrameSender = mpsc::UnboundedSender<String>;

struct Session {
    kind: SessionKind,
    channels: HashSet<String>,
    sender: FrameSender,
}

pub struct ConnectionRegistry {
    subscriptions: Arc<SubscriptionManager>,
    sessions: DashMap<SessionId, Session>,
}

impl ConnectionRegistry {
    pub fn new(subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            subscriptions,
            sessions: DashMap::new(),
        }
    }

    /// Add a session with its initial interest set (fixed at connect time
    /// for SSE, empty for WebSocket). Duplicate names in `channels` count
    /// once.
    pub fn register(
        &self,
        kind: SessionKind,
        channels: Vec<String>,
    ) -> (SessionId, mpsc::UnboundedReceiver<String>) {
        let id = SessionId::generate();
        let channels: HashSet<String> = channels.into_iter().collect();
        let (tx, rx) = mpsc::unbounded_channel();

        for channel in &channels {
            self.subscriptions.add_interest(channel);
        }

        info!(
            session_id = %id,
            kind = ?kind,
            channels = channels.len(),
            "Session registered"
        );

        self.sessions.insert(
            id.clone(),
            Session {
                kind,
                channels,
                sender: tx,
            },
        );

        (id, rx)
    }

    /// Add `channel` to a session's interest set (WebSocket subscribe
    /// path). A duplicate subscribe for a channel the session already
    /// holds is a no-op and never double-increments the reference count.
    pub fn update_interest(&self, session_id: &SessionId, channel: &str) {
        let newly_added = match self.sessions.get_mut(session_id) {
            Some(mut session) => session.channels.insert(channel.to_string()),
            None => {
                warn!(
                    session_id = %session_id,
                    channel = %channel,
                    "Interest update for unknown session"
                );
                return;
            }
        };

        if newly_added {
            debug!(session_id = %session_id, channel = %channel, "Session subscribed to channel");
            self.subscriptions.add_interest(channel);
        }
    }

    /// Remove a session, releasing each channel it held exactly once.
    ///
    /// Idempotent: both transport close and transport error paths may call
    /// this for the same session id; the second call finds nothing.
    pub fn unregister(&self, session_id: &SessionId) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            for channel in &session.channels {
                self.subscriptions.remove_interest(channel);
            }
            info!(
                session_id = %session_id,
                kind = ?session.kind,
                channels = session.channels.len(),
                "Session unregistered"
            );
        }
    }

    /// Snapshot of the sessions currently interested in `channel`.
    #[must_use]
    pub fn sessions_for(&self, channel: &str) -> Vec<(SessionId, FrameSender)> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().channels.contains(channel))
            .map(|entry| (entry.key().clone(), entry.value().sender.clone()))
            .collect()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}
