//! WebSocket transport (subscribe-style).
//!
//! Clients connect to `GET /api/ws`, then grow their interest set with
//! `{"action":"subscribe","channels":[...]}` control messages; there is
//! no ack and the set never shrinks. Routed frames are pushed as text.
//! Malformed control messages are logged and dropped; the connection
//! stays open. Close or error unregisters the session exactly once
//! (the unregister path is idempotent, so close-then-error is safe).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::AppState;
use streamboard_gateway::{ClientCommand, ConnectionRegistry, SessionKind};

/// WebSocket handler for channel subscriptions
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<ConnectionRegistry>) {
    // WebSocket sessions start with an empty interest set.
    let (session_id, mut rx) = registry.register(SessionKind::WebSocket, Vec::new());
    info!(session_id = %session_id, "WebSocket client connected");

    let (mut sink, mut stream) = socket.split();

    // Writer task: routed frames -> socket. A write failure means the
    // transport is broken, which triggers the unregister path.
    let writer_registry = registry.clone();
    let writer_id = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                debug!(session_id = %writer_id, error = %e, "WebSocket write failed");
                writer_registry.unregister(&writer_id);
                break;
            }
        }
    });

    // Reader loop: control messages from the client.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                Ok(ClientCommand::Subscribe { channels }) => {
                    for channel in channels {
                        registry.update_interest(&session_id, &channel);
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "Malformed control message dropped"
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong/binary: ignored
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    registry.unregister(&session_id);
    // Unregister dropped the session sender, so the writer drains and
    // exits on its own.
    let _ = writer.await;
    info!(session_id = %session_id, "WebSocket client disconnected");
}
