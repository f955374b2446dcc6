//! HTTP layer for the gateway and the relay.
//!
//! Two independent routers: the gateway router carries the SSE and
//! WebSocket fan-out endpoints plus health, the relay router carries the
//! producer/consumer endpoints with the strict unknown-path close policy.
//! They are served on separate listeners.

pub mod error;
pub mod health;
pub mod relay;
pub mod sse;
pub mod websocket;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use streamboard_gateway::{ConnectionRegistry, RelayHub};

pub use error::AppError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub relay: Arc<RelayHub>,
    /// Reject relay connections from non-loopback peers.
    pub relay_local_only: bool,
}

/// Gateway router: SSE + WebSocket fan-out endpoints and health.
pub fn create_gateway_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/api/status", get(health::status))
        .route("/api/events", get(sse::events_handler))
        .route("/api/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Relay router: role-path producer/consumer endpoints. Any other path
/// that arrives as a WebSocket upgrade is accepted and closed with the
/// relay's invalid-path close code.
pub fn create_relay_router(state: AppState) -> Router {
    Router::new()
        .route("/producer", get(relay::producer_handler))
        .route("/consumer", get(relay::consumer_handler))
        .fallback(relay::invalid_path_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use streamboard_gateway::{SubscriptionManager, Upstream};

    struct NoopUpstream;

    impl Upstream for NoopUpstream {
        fn subscribe(&self, _channel: &str) -> streamboard_gateway::Result<()> {
            Ok(())
        }

        fn unsubscribe(&self, _channel: &str) -> streamboard_gateway::Result<()> {
            Ok(())
        }
    }

    pub fn app_state() -> AppState {
        let subscriptions = Arc::new(SubscriptionManager::new(Arc::new(NoopUpstream)));
        AppState {
            registry: Arc::new(ConnectionRegistry::new(subscriptions)),
            relay: Arc::new(RelayHub::new()),
            relay_local_only: false,
        }
    }
}
