//! Role-path relay endpoints.
//!
//! `/producer` and `/consumer` are the only recognized paths. A WebSocket
//! upgrade on any other path is accepted and immediately closed with code
//! 4000 / "Invalid path", registering nothing. Producers only read;
//! consumers only receive. Frames pass through verbatim.

use axum::{
    extract::{
        rejection::ExtensionRejection,
        ws::{
            rejection::WebSocketUpgradeRejection, CloseFrame, Message, Utf8Bytes, WebSocket,
            WebSocketUpgrade,
        },
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{AppError, AppState};
use streamboard_gateway::{RelayFrame, RelayHub};

/// Close code sent for connections to unrecognized relay paths.
const INVALID_PATH_CLOSE_CODE: u16 = 4000;

/// In local-only mode an unknown peer address counts as remote: the
/// connection is refused rather than let through unchecked.
fn reject_remote(state: &AppState, peer: Option<SocketAddr>) -> Option<Response> {
    if !state.relay_local_only {
        return None;
    }
    match peer {
        Some(addr) if addr.ip().is_loopback() => None,
        _ => {
            info!("Rejected non-local relay connection");
            Some(AppError::forbidden("Relay is restricted to local connections").into_response())
        }
    }
}

pub async fn producer_handler(
    State(state): State<AppState>,
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = connect_info.ok().map(|ConnectInfo(addr)| addr);
    if let Some(rejection) = reject_remote(&state, peer) {
        return rejection;
    }
    ws.on_upgrade(move |socket| handle_producer(socket, state.relay))
        .into_response()
}

pub async fn consumer_handler(
    State(state): State<AppState>,
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = connect_info.ok().map(|ConnectInfo(addr)| addr);
    if let Some(rejection) = reject_remote(&state, peer) {
        return rejection;
    }
    ws.on_upgrade(move |socket| handle_consumer(socket, state.relay))
        .into_response()
}

/// Unrecognized path: a WebSocket upgrade is closed with the relay's
/// distinct close code, a plain HTTP request gets 404.
pub async fn invalid_path_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_upgrade(|mut socket| async move {
                info!("Invalid relay path, closing connection");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: INVALID_PATH_CLOSE_CODE,
                        reason: Utf8Bytes::from_static("Invalid path"),
                    })))
                    .await;
            })
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_producer(socket: WebSocket, hub: Arc<RelayHub>) {
    let id = hub.add_producer();
    let (_sink, mut stream) = socket.split();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                hub.broadcast(&RelayFrame::Text(text.as_str().to_owned()));
            }
            Ok(Message::Binary(bytes)) => {
                hub.broadcast(&RelayFrame::Binary(bytes.to_vec()));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(session_id = %id, error = %e, "Producer socket error");
                break;
            }
        }
    }

    hub.remove_producer(&id);
}

async fn handle_consumer(socket: WebSocket, hub: Arc<RelayHub>) {
    let (id, mut rx) = hub.add_consumer();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let sent = match frame {
                    None => break,
                    Some(RelayFrame::Text(text)) => sink.send(Message::Text(text.into())).await,
                    Some(RelayFrame::Binary(bytes)) => sink.send(Message::Binary(bytes.into())).await,
                };
                if let Err(e) = sent {
                    debug!(session_id = %id, error = %e, "Consumer write failed");
                    break;
                }
            }
            // Keep reading so close frames and errors are observed.
            msg = stream.next() => match msg {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.remove_consumer(&id);
}

#[cfg(test)]
mod tests {
    use crate::create_relay_router;
    use crate::test_support::app_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_path_without_upgrade_is_not_found() {
        let app = create_relay_router(app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_producer_requires_websocket_upgrade() {
        let app = create_relay_router(app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/producer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // Plain GET without upgrade headers is rejected by the extractor.
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_local_only_rejects_unknown_peers() {
        let mut state = app_state();
        state.relay_local_only = true;
        let relay = state.relay.clone();
        let app = create_relay_router(state);

        // Serving without connect-info means peer extraction fails: with
        // local_only set the unknown peer is refused before any upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        let err = tokio_tungstenite::connect_async(format!("ws://{addr}/consumer"))
            .await
            .unwrap_err();
        match err {
            tokio_tungstenite::tungstenite::Error::Http(response) => {
                assert_eq!(response.status(), StatusCode::FORBIDDEN);
            }
            other => panic!("Expected HTTP rejection, got {other:?}"),
        }
        assert_eq!(relay.consumer_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_upgrade_closes_with_4000() {
        let state = app_state();
        let relay = state.relay.clone();
        let app = create_relay_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // The handshake on an unrecognized path is accepted, then closed
        // immediately with the relay's distinct close code.
        let (mut socket, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/nope"))
            .await
            .unwrap();

        match socket.next().await.unwrap().unwrap() {
            tokio_tungstenite::tungstenite::Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason.as_str(), "Invalid path");
            }
            other => panic!("Expected close frame, got {other:?}"),
        }

        assert_eq!(relay.producer_count(), 0);
        assert_eq!(relay.consumer_count(), 0);
    }
}
