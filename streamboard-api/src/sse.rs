//! Server-Sent-Events transport.
//!
//! `GET /api/events?channels=a,b` opens a session whose interest set is
//! fixed for the connection's lifetime. The first frame is the literal
//! `data: Connected` sentinel (clients ignore it); every following frame
//! carries the `{channel, message}` JSON produced by the router. Dropping
//! the response stream unregisters the session.

use axum::{
    extract::{Query, State},
    http::header,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::info;

use crate::{AppError, AppState};
use streamboard_core::SessionId;
use streamboard_gateway::{ConnectionRegistry, SessionKind};

/// Query parameters for the SSE endpoint
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated channel list, fixed for the connection's lifetime.
    pub channels: Option<String>,
}

/// Unregisters the session when the transport goes away, whichever way
/// it goes away.
struct SessionGuard {
    registry: Arc<ConnectionRegistry>,
    session_id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.session_id);
    }
}

/// Session frame queue as an SSE event stream. Holding the guard ties the
/// session lifetime to the response stream.
struct SessionStream {
    rx: mpsc::UnboundedReceiver<String>,
    _guard: SessionGuard,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(Event::default().data(frame)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// SSE handler for channel subscriptions
pub async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let channels: Vec<String> = query
        .channels
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();

    if channels.is_empty() {
        return Err(AppError::bad_request(
            "Channels query parameter is required.",
        ));
    }

    let (session_id, rx) = state.registry.register(SessionKind::Sse, channels);
    info!(session_id = %session_id, "SSE client connected");

    let guard = SessionGuard {
        registry: state.registry.clone(),
        session_id,
    };

    // Sentinel first, then routed frames.
    let sentinel = stream::once(async { Ok::<_, Infallible>(Event::default().data("Connected")) });
    let frames = SessionStream { rx, _guard: guard };

    let sse = Sse::new(sentinel.chain(frames)).keep_alive(KeepAlive::default());
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        sse,
    ))
}

#[cfg(test)]
mod tests {
    use crate::test_support::app_state;
    use crate::create_gateway_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_missing_channels_is_bad_request() {
        let app = create_gateway_router(app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_channels_is_bad_request() {
        let app = create_gateway_router(app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/events?channels=,,")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_stream_headers() {
        let state = app_state();
        let registry = state.registry.clone();
        let app = create_gateway_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/events?channels=temp,humidity")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
        assert_eq!(response.headers().get("connection").unwrap(), "keep-alive");

        // The connection registered a live session holding both channels.
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.subscriptions().count("temp"), 1);
        assert_eq!(registry.subscriptions().count("humidity"), 1);

        // Dropping the response stream releases the session.
        drop(response);
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.subscriptions().count("temp"), 0);
    }
}
