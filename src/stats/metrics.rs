//! Statistics and metrics for the fan-out proxy

use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::MessageKind;

/// Live counters for one message kind
///
/// Updated by the registry and the fan-out tasks; read with [`snapshot`].
///
/// [`snapshot`]: FanoutCounters::snapshot
#[derive(Debug, Default)]
pub struct FanoutCounters {
    upstream_opens: AtomicU64,
    upstream_closes: AtomicU64,
    upstream_failures: AtomicU64,
    messages_received: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
    send_failures: AtomicU64,
}

impl FanoutCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn upstream_opened(&self) {
        self.upstream_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn upstream_closed(&self) {
        self.upstream_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn upstream_failed(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self, count: u64) {
        self.deliveries.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters
    pub fn snapshot(&self, kind: MessageKind) -> FanoutStats {
        FanoutStats {
            kind,
            upstream_opens: self.upstream_opens.load(Ordering::Relaxed),
            upstream_closes: self.upstream_closes.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            active_channels: 0,
            subscribers: 0,
        }
    }
}

/// Fan-out statistics for one message kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutStats {
    /// Message kind
    pub kind: MessageKind,
    /// Upstream subscriptions opened
    pub upstream_opens: u64,
    /// Upstream subscriptions released with `CloseChannel`
    pub upstream_closes: u64,
    /// Upstream subscribe or stream failures
    pub upstream_failures: u64,
    /// Messages received from upstream
    pub messages_received: u64,
    /// Messages pushed into subscriber queues
    pub deliveries: u64,
    /// Subscribers disconnected for being too slow
    pub evictions: u64,
    /// Subscribers removed after a downstream send failure
    pub send_failures: u64,
    /// Channel types with an open or opening upstream subscription
    pub active_channels: usize,
    /// Live local subscribers across all channel types
    pub subscribers: usize,
}

impl FanoutStats {
    /// Subscribers the proxy disconnected itself
    pub fn removed(&self) -> u64 {
        self.evictions + self.send_failures
    }
}

/// Proxy-wide statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStats {
    /// Demand fan-out
    pub demand: FanoutStats,
    /// Supply fan-out
    pub supply: FanoutStats,
}

impl ProxyStats {
    /// Total live subscribers across both kinds
    pub fn total_subscribers(&self) -> usize {
        self.demand.subscribers + self.supply.subscribers
    }

    /// Total open upstream subscriptions across both kinds
    pub fn open_upstreams(&self) -> usize {
        self.demand.active_channels + self.supply.active_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_new() {
        let counters = FanoutCounters::new();
        let stats = counters.snapshot(MessageKind::Demand);

        assert_eq!(stats.kind, MessageKind::Demand);
        assert_eq!(stats.upstream_opens, 0);
        assert_eq!(stats.deliveries, 0);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let counters = FanoutCounters::new();
        counters.upstream_opened();
        counters.message_received();
        counters.delivered(3);
        counters.delivered(2);
        counters.evicted(1);
        counters.send_failed();
        counters.upstream_closed();

        let stats = counters.snapshot(MessageKind::Supply);
        assert_eq!(stats.upstream_opens, 1);
        assert_eq!(stats.upstream_closes, 1);
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.deliveries, 5);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.removed(), 2);
    }

    #[test]
    fn test_proxy_stats_totals() {
        let counters = FanoutCounters::new();
        let mut demand = counters.snapshot(MessageKind::Demand);
        demand.subscribers = 2;
        demand.active_channels = 1;
        let mut supply = counters.snapshot(MessageKind::Supply);
        supply.subscribers = 3;
        supply.active_channels = 2;

        let stats = ProxyStats { demand, supply };
        assert_eq!(stats.total_subscribers(), 5);
        assert_eq!(stats.open_upstreams(), 3);
    }
}
