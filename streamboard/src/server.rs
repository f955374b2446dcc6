//! Server lifecycle management
//!
//! Wires the upstream adapter, subscription manager, registry, router
//! task and relay hub together, then runs the gateway and relay
//! listeners until a shutdown signal arrives. On shutdown the
//! cancellation token stops the router and the upstream subscriber task;
//! dropping the pub/sub connection releases every upstream subscription.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use streamboard_api::{create_gateway_router, create_relay_router, AppState};
use streamboard_core::Config;
use streamboard_gateway::{
    router, ConnectionRegistry, RedisUpstream, RelayHub, SubscriptionManager, Upstream,
};

/// Streamboard server - manages the gateway and relay listeners
pub struct StreamboardServer {
    config: Config,
}

impl StreamboardServer {
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start all components and wait for shutdown signal
    pub async fn start(self) -> Result<()> {
        let cancel = CancellationToken::new();

        // Upstream adapter: single Redis connection, lazily established by
        // the subscriber task, shared by every session.
        let upstream = RedisUpstream::new(
            &self.config.redis.url,
            Duration::from_secs(self.config.redis.connect_timeout_seconds),
        )
        .context("Failed to create Redis upstream")?;
        let (handle, messages) = upstream.start(cancel.clone());
        let handle: Arc<dyn Upstream> = Arc::new(handle);

        let subscriptions = Arc::new(SubscriptionManager::new(handle));
        let registry = Arc::new(ConnectionRegistry::new(subscriptions));
        let relay = Arc::new(RelayHub::new());

        let router_task = tokio::spawn(router::run(messages, registry.clone(), cancel.clone()));

        let state = AppState {
            registry,
            relay,
            relay_local_only: self.config.relay.local_only,
        };

        // Shutdown signal -> cancellation token
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        });

        let gateway_addr = self.config.http_address();
        let gateway_listener = TcpListener::bind(&gateway_addr)
            .await
            .with_context(|| format!("Failed to bind gateway listener on {gateway_addr}"))?;
        info!("Gateway listening on {gateway_addr}");

        let gateway = axum::serve(gateway_listener, create_gateway_router(state.clone()))
            .with_graceful_shutdown(cancel.clone().cancelled_owned());

        if self.config.relay.enabled {
            let relay_addr = self.config.relay_address();
            let relay_listener = TcpListener::bind(&relay_addr)
                .await
                .with_context(|| format!("Failed to bind relay listener on {relay_addr}"))?;
            info!("Relay listening on {relay_addr} (/producer, /consumer)");

            // Relay handlers need the peer address for the local-only check.
            let relay_server = axum::serve(
                relay_listener,
                create_relay_router(state)
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(cancel.clone().cancelled_owned());

            tokio::try_join!(gateway, relay_server)
                .context("Server error")?;
        } else {
            gateway.await.context("Server error")?;
        }

        cancel.cancel();
        let _ = router_task.await;
        info!("Streamboard stopped");
        Ok(())
    }
}
