//! Per-channel reference counting over the upstream adapter.
//!
//! The upstream connection holds a subscription for a channel exactly
//! while at least one session is interested in it: the first reference
//! subscribes, the last reference unsubscribes. Both transitions are
//! computed inside one critical section over the count table, so two
//! concurrent registrations can never both observe a zero count (and two
//! removals can never both observe one).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::upstream::Upstream;

pub struct SubscriptionManager {
    upstream: Arc<dyn Upstream>,
    counts: Mutex<HashMap<String, usize>>,
}

impl SubscriptionManager {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Register one more session's interest in `channel`. Subscribes
    /// upstream on the 0 -> 1 transition.
    ///
    /// Upstream failures are logged and the count is kept: local
    /// bookkeeping and true upstream state may diverge transiently.
    pub fn add_interest(&self, channel: &str) {
        let mut counts = self.counts.lock();
        let count = counts.entry(channel.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(channel = %channel, "First reference, subscribing upstream");
            if let Err(e) = self.upstream.subscribe(channel) {
                warn!(error = %e, channel = %channel, "Upstream subscribe failed");
            }
        }
    }

    /// Release one session's interest in `channel`. Unsubscribes upstream
    /// and removes the entry on the 1 -> 0 transition.
    ///
    /// Releasing a channel with no references is a bookkeeping bug in the
    /// caller; it is logged and ignored, never a panic, and the count
    /// never goes negative.
    pub fn remove_interest(&self, channel: &str) {
        let mut counts = self.counts.lock();
        match counts.get_mut(channel) {
            None => {
                warn!(channel = %channel, "Removing interest on channel with no references");
            }
            Some(count) if *count <= 1 => {
                counts.remove(channel);
                debug!(channel = %channel, "Last reference released, unsubscribing upstream");
                if let Err(e) = self.upstream.unsubscribe(channel) {
                    warn!(error = %e, channel = %channel, "Upstream unsubscribe failed");
                }
            }
            Some(count) => {
                *count -= 1;
            }
        }
    }

    /// Current reference count for `channel` (0 if absent).
    #[must_use]
    pub fn count(&self, channel: &str) -> usize {
        self.counts.lock().get(channel).copied().unwrap_or(0)
    }

    /// Invariant check: a channel entry exists iff its count is positive,
    /// which is exactly when the upstream should hold the subscription.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.count(channel) > 0
    }

    /// Snapshot of every channel with at least one reference.
    #[must_use]
    pub fn active_channels(&self) -> Vec<String> {
        self.counts.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn active_channel_count(&self) -> usize {
        self.counts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::testing::{FailingUpstream, RecordingUpstream};

    fn manager() -> (Arc<RecordingUpstream>, SubscriptionManager) {
        let upstream = Arc::new(RecordingUpstream::default());
        let manager = SubscriptionManager::new(upstream.clone());
        (upstream, manager)
    }

    #[test]
    fn test_first_reference_subscribes_last_unsubscribes() {
        let (upstream, manager) = manager();

        manager.add_interest("temp");
        manager.add_interest("temp");
        manager.add_interest("temp");
        assert_eq!(manager.count("temp"), 3);
        assert!(manager.is_subscribed("temp"));

        manager.remove_interest("temp");
        manager.remove_interest("temp");
        assert!(manager.is_subscribed("temp"));
        manager.remove_interest("temp");
        assert_eq!(manager.count("temp"), 0);
        assert!(!manager.is_subscribed("temp"));
        assert!(manager.active_channels().is_empty());

        // Exactly one upstream subscribe and one unsubscribe.
        assert_eq!(
            upstream.calls(),
            vec!["subscribe:temp", "unsubscribe:temp"]
        );
    }

    #[test]
    fn test_redundant_remove_is_logged_not_fatal() {
        let (upstream, manager) = manager();

        manager.remove_interest("ghost");
        assert_eq!(manager.count("ghost"), 0);

        manager.add_interest("temp");
        manager.remove_interest("temp");
        manager.remove_interest("temp");
        assert_eq!(manager.count("temp"), 0);

        assert_eq!(
            upstream.calls(),
            vec!["subscribe:temp", "unsubscribe:temp"]
        );
    }

    #[test]
    fn test_upstream_failure_does_not_roll_back_count() {
        let manager = SubscriptionManager::new(Arc::new(FailingUpstream));

        manager.add_interest("temp");
        assert_eq!(manager.count("temp"), 1);

        manager.remove_interest("temp");
        assert_eq!(manager.count("temp"), 0);
    }

    #[test]
    fn test_independent_channels() {
        let (upstream, manager) = manager();

        manager.add_interest("temp");
        manager.add_interest("humidity");
        manager.remove_interest("temp");

        assert!(!manager.is_subscribed("temp"));
        assert!(manager.is_subscribed("humidity"));
        assert_eq!(manager.active_channels(), vec!["humidity".to_string()]);
        assert_eq!(
            upstream.calls(),
            vec![
                "subscribe:temp",
                "subscribe:humidity",
                "unsubscribe:temp"
            ]
        );
    }
}
