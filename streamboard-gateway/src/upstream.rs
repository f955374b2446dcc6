//! Upstream pub/sub adapter.
//!
//! Wraps the single Redis connection shared by every client session. The
//! adapter owns a background subscriber task holding the async pub/sub
//! connection; callers talk to it through [`UpstreamHandle`], which sends
//! fire-and-forget subscribe/unsubscribe commands over a control channel.
//! Inbound `(channel, payload)` messages are forwarded to the router.
//!
//! Reconnect policy: on connection loss the task reconnects with
//! exponential backoff and re-subscribes every channel in its active set.
//! Reconnection is transparent to clients; previously established
//! subscriptions are never failed.

use futures::stream::StreamExt;
use redis::Client as RedisClient;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::wire::ChannelMessage;

/// Initial backoff delay for subscriber reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for subscriber reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Seam between the subscription manager and the concrete upstream.
///
/// Both operations are idempotent and fire-and-forget: an `Ok` return
/// means the request was handed to the adapter, not that the upstream
/// subscription is already active. Failures are reported as error values
/// for the caller to log; they are never surfaced to clients.
pub trait Upstream: Send + Sync {
    fn subscribe(&self, channel: &str) -> Result<()>;
    fn unsubscribe(&self, channel: &str) -> Result<()>;
}

pub(crate) enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// Cheap cloneable handle to the subscriber task.
#[derive(Clone)]
pub struct UpstreamHandle {
    control_tx: mpsc::UnboundedSender<Command>,
}

impl UpstreamHandle {
    pub(crate) fn new(control_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { control_tx }
    }
}

impl Upstream for UpstreamHandle {
    fn subscribe(&self, channel: &str) -> Result<()> {
        self.control_tx
            .send(Command::Subscribe(channel.to_string()))
            .map_err(|_| Error::UpstreamGone)
    }

    fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.control_tx
            .send(Command::Unsubscribe(channel.to_string()))
            .map_err(|_| Error::UpstreamGone)
    }
}

/// Describes how one connected stint of the subscriber loop ended.
enum RunExit {
    /// Cancellation token fired; shut down.
    Cancelled,
    /// Control channel closed (all handles dropped); shut down.
    ControlClosed,
    /// Router receiver dropped; nothing left to deliver to.
    RouterGone,
    /// Connection was healthy and then dropped. Backoff resets.
    Disconnected,
    /// Could not connect or subscribe. Backoff keeps increasing.
    ConnectFailed(Error),
}

/// Redis-backed upstream adapter.
pub struct RedisUpstream {
    client: RedisClient,
    connect_timeout: Duration,
}

impl RedisUpstream {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = RedisClient::open(url)?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    /// Spawn the subscriber task.
    ///
    /// Returns the control handle and the inbound message stream for the
    /// router. The task runs until `cancel` fires or every handle is
    /// dropped; dropping the pub/sub connection on exit releases all
    /// upstream subscriptions.
    pub fn start(
        self,
        cancel: CancellationToken,
    ) -> (UpstreamHandle, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // Channels currently referenced by at least one session. Kept
            // here so reconnects can replay the full subscription set.
            let mut active: HashSet<String> = HashSet::new();
            let mut backoff_secs = INITIAL_BACKOFF_SECS;

            loop {
                if cancel.is_cancelled() {
                    info!("Upstream subscriber task cancelled");
                    return;
                }

                match Self::run_connected(
                    &self.client,
                    self.connect_timeout,
                    &mut active,
                    &mut control_rx,
                    &msg_tx,
                    &cancel,
                )
                .await
                {
                    RunExit::Cancelled => {
                        info!("Upstream subscriber task cancelled");
                        return;
                    }
                    RunExit::ControlClosed => {
                        warn!("Upstream control channel closed, exiting");
                        return;
                    }
                    RunExit::RouterGone => {
                        warn!("Router receiver dropped, exiting");
                        return;
                    }
                    RunExit::Disconnected => {
                        // Connection was healthy before it dropped; the
                        // server was reachable, so reset backoff.
                        error!(
                            "Upstream connection lost, reconnecting after {}s",
                            INITIAL_BACKOFF_SECS
                        );
                        backoff_secs = INITIAL_BACKOFF_SECS;
                    }
                    RunExit::ConnectFailed(e) => {
                        error!(
                            error = %e,
                            backoff_secs = backoff_secs,
                            "Upstream connect failed, retrying after backoff"
                        );
                    }
                }

                // Backoff wait. Control commands are still applied so the
                // active set stays current for the next resubscribe-all.
                let deadline = tokio::time::sleep(Duration::from_secs(backoff_secs));
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Upstream subscriber task cancelled during backoff");
                            return;
                        }
                        () = &mut deadline => break,
                        cmd = control_rx.recv() => match cmd {
                            None => {
                                warn!("Upstream control channel closed, exiting");
                                return;
                            }
                            Some(Command::Subscribe(c)) => {
                                active.insert(c);
                            }
                            Some(Command::Unsubscribe(c)) => {
                                active.remove(&c);
                            }
                        },
                    }
                }

                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        });

        (UpstreamHandle::new(control_tx), msg_rx)
    }

    /// Run one connected stint: connect, replay the active subscription
    /// set, then process control commands and inbound messages until the
    /// connection drops or shutdown is requested.
    async fn run_connected(
        client: &RedisClient,
        connect_timeout: Duration,
        active: &mut HashSet<String>,
        control_rx: &mut mpsc::UnboundedReceiver<Command>,
        msg_tx: &mpsc::UnboundedSender<ChannelMessage>,
        cancel: &CancellationToken,
    ) -> RunExit {
        let pubsub = match timeout(connect_timeout, client.get_async_pubsub()).await {
            Ok(Ok(ps)) => ps,
            Ok(Err(e)) => return RunExit::ConnectFailed(e.into()),
            Err(_) => {
                return RunExit::ConnectFailed(Error::Timeout(
                    "connecting to Redis pub/sub".to_string(),
                ))
            }
        };
        let (mut sink, mut stream) = pubsub.split();

        // Resubscribe-all: replay every channel still referenced locally.
        for channel in active.iter() {
            if let Err(e) = sink.subscribe(channel).await {
                return RunExit::ConnectFailed(e.into());
            }
        }
        info!(
            channels = active.len(),
            "Upstream subscriber connected"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return RunExit::Cancelled,
                cmd = control_rx.recv() => match cmd {
                    None => return RunExit::ControlClosed,
                    Some(Command::Subscribe(channel)) => {
                        // Idempotent: a channel already in the active set
                        // is not re-sent upstream.
                        if active.insert(channel.clone()) {
                            debug!(channel = %channel, "Subscribing upstream");
                            if let Err(e) = sink.subscribe(&channel).await {
                                warn!(error = %e, channel = %channel, "Upstream subscribe failed");
                                return RunExit::Disconnected;
                            }
                        }
                    }
                    Some(Command::Unsubscribe(channel)) => {
                        if active.remove(&channel) {
                            debug!(channel = %channel, "Unsubscribing upstream");
                            if let Err(e) = sink.unsubscribe(&channel).await {
                                warn!(error = %e, channel = %channel, "Upstream unsubscribe failed");
                                return RunExit::Disconnected;
                            }
                        }
                    }
                },
                msg = stream.next() => match msg {
                    None => return RunExit::Disconnected,
                    Some(msg) => {
                        let channel = msg.get_channel_name().to_string();
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, channel = %channel, "Invalid payload");
                                continue;
                            }
                        };
                        if msg_tx.send(ChannelMessage { channel, payload }).is_err() {
                            return RunExit::RouterGone;
                        }
                    }
                },
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Fake upstream that records every call, for asserting call ordering
    /// in subscription-lifecycle tests.
    #[derive(Default)]
    pub struct RecordingUpstream {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingUpstream {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl Upstream for RecordingUpstream {
        fn subscribe(&self, channel: &str) -> Result<()> {
            self.calls.lock().push(format!("subscribe:{channel}"));
            Ok(())
        }

        fn unsubscribe(&self, channel: &str) -> Result<()> {
            self.calls.lock().push(format!("unsubscribe:{channel}"));
            Ok(())
        }
    }

    /// Fake upstream whose operations always fail, for verifying that
    /// bookkeeping proceeds regardless of upstream errors.
    #[derive(Default)]
    pub struct FailingUpstream;

    impl Upstream for FailingUpstream {
        fn subscribe(&self, _channel: &str) -> Result<()> {
            Err(Error::Redis("connection refused".to_string()))
        }

        fn unsubscribe(&self, _channel: &str) -> Result<()> {
            Err(Error::Redis("connection refused".to_string()))
        }
    }
}
