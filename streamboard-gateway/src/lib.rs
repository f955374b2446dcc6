//! Channel fan-out gateway core.
//!
//! Bridges a single upstream Redis pub/sub connection to many client
//! sessions: subscriptions are reference-counted per channel so the
//! upstream connection only ever holds the minimal subscription set, and
//! each inbound message is routed to exactly the sessions interested in
//! its channel. The relay module is the degenerate case of the same
//! pattern: producers broadcast to every consumer with no filtering.

pub mod error;
pub mod registry;
pub mod relay;
pub mod router;
pub mod subscriptions;
pub mod upstream;
pub mod wire;

pub use error::{Error, Result};
pub use registry::{ConnectionRegistry, SessionKind};
pub use relay::{RelayFrame, RelayHub};
pub use subscriptions::SubscriptionManager;
pub use upstream::{RedisUpstream, Upstream, UpstreamHandle};
pub use wire::{ChannelMessage, ClientCommand};
