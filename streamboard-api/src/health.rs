//! Health check and status endpoints
//!
//! Provides simple health check for monitoring probes plus live gateway
//! and relay counters.

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sessions: usize,
    pub active_channels: usize,
    pub relay_producers: usize,
    pub relay_consumers: usize,
}

/// Live counters for the gateway and the relay.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        sessions: state.registry.session_count(),
        active_channels: state.registry.subscriptions().active_channel_count(),
        relay_producers: state.relay.producer_count(),
        relay_consumers: state.relay.consumer_count(),
    })
}
