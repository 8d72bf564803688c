//! Proxy RPC surface
//!
//! [`ProxyService`] exposes the broker's RPC set to local callers:
//!
//! - `SubscribeDemand`/`SubscribeSupply` go through a [`ChannelMultiplexer`]
//!   so any number of local subscribers share one upstream subscription per
//!   channel type.
//! - Mbus calls are relayed 1:1 with no local state.
//! - Notify/propose/select/confirm are forwarded as-is, except that notify
//!   stamps a missing timestamp.
//! - Gateway forwarding is not supported and fails with
//!   [`Error::Unimplemented`](crate::error::Error::Unimplemented).
//!
//! Streaming operations take a [`DownstreamSink`] and run until the
//! subscription ends; the transport spawns one per connected stream.

use std::sync::Arc;

use crate::fanout::ChannelMultiplexer;
use crate::message::{Demand, Supply};
use crate::registry::RegistryConfig;
use crate::stats::ProxyStats;
use crate::upstream::Upstream;

mod gateway;
mod mbus;
mod passthrough;
pub mod sink;
mod subscribe;

pub use sink::DownstreamSink;

/// The proxy service
pub struct ProxyService<U: Upstream> {
    upstream: Arc<U>,
    demand: ChannelMultiplexer<U, Demand>,
    supply: ChannelMultiplexer<U, Supply>,
    client_id: u64,
}

impl<U: Upstream> ProxyService<U> {
    /// Create a service over an upstream session with default configuration
    pub fn new(upstream: Arc<U>, client_id: u64) -> Self {
        Self::with_config(upstream, client_id, RegistryConfig::default())
    }

    /// Create a service with custom registry configuration
    ///
    /// `client_id` is the id the directory service assigned to this node; it
    /// is what the broker sees on every shared subscription.
    pub fn with_config(upstream: Arc<U>, client_id: u64, config: RegistryConfig) -> Self {
        Self {
            demand: ChannelMultiplexer::new(Arc::clone(&upstream), client_id, config.clone()),
            supply: ChannelMultiplexer::new(Arc::clone(&upstream), client_id, config),
            upstream,
            client_id,
        }
    }

    /// Upstream session
    pub fn upstream(&self) -> &Arc<U> {
        &self.upstream
    }

    /// Client id presented upstream
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Demand multiplexer
    pub fn demand(&self) -> &ChannelMultiplexer<U, Demand> {
        &self.demand
    }

    /// Supply multiplexer
    pub fn supply(&self) -> &ChannelMultiplexer<U, Supply> {
        &self.supply
    }

    /// Fan-out statistics for both kinds
    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            demand: self.demand.stats(),
            supply: self.supply.stats(),
        }
    }

    /// End every local subscription and release every upstream one
    pub async fn shutdown(&self) -> usize {
        let (demand, supply) = tokio::join!(self.demand.shutdown(), self.supply.shutdown());
        tracing::info!(
            demand_subscribers = demand,
            supply_subscribers = supply,
            "Proxy service shut down"
        );
        demand + supply
    }
}
