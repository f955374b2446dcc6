//! Routing of upstream messages to interested sessions.
//!
//! One dispatch task owns the inbound message stream. For each message it
//! serializes the wire frame once and writes it to every interested
//! session's queue; per-session delivery order therefore matches upstream
//! arrival order. A failed write means the session is gone and triggers
//! its unregister path without affecting delivery to the rest. Payloads
//! are never transformed here.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;
use crate::wire::{self, ChannelMessage};

/// Deliver one upstream message to every session interested in its
/// channel. Returns the number of sessions written to.
pub fn dispatch(registry: &ConnectionRegistry, message: &ChannelMessage) -> usize {
    let frame = match wire::encode_frame(&message.channel, &message.payload) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, channel = %message.channel, "Failed to encode frame");
            return 0;
        }
    };

    let mut sent_count = 0;
    let mut failed_sessions = Vec::new();

    for (session_id, sender) in registry.sessions_for(&message.channel) {
        if sender.send(frame.clone()).is_ok() {
            sent_count += 1;
        } else {
            warn!(
                session_id = %session_id,
                channel = %message.channel,
                "Failed to deliver to session, marking for cleanup"
            );
            failed_sessions.push(session_id);
        }
    }

    for session_id in failed_sessions {
        registry.unregister(&session_id);
    }

    if sent_count > 0 {
        debug!(
            channel = %message.channel,
            sessions = sent_count,
            "Message routed"
        );
    }

    sent_count
}

/// Run the dispatch loop until the upstream adapter stops or shutdown is
/// requested.
pub async fn run(
    mut messages: mpsc::UnboundedReceiver<ChannelMessage>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Router task cancelled");
                return;
            }
            msg = messages.recv() => match msg {
                None => {
                    info!("Upstream message stream ended, router exiting");
                    return;
                }
                Some(msg) => {
                    dispatch(&registry, &msg);
                }
            },
        }
    }
}
