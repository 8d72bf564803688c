//! Fan-out multiplexer
//!
//! Many local subscribers, one upstream subscription per channel type.
//!
//! The first subscriber for a channel type creates the registry entry and a
//! dedicated fan-out task is spawned for it. The task opens the upstream
//! subscription, pushes every received message into every registered queue,
//! and releases the upstream subscription when the last subscriber leaves.
//! Later subscribers only add a queue. No subscriber connection owns the
//! upstream stream, so any of them can disconnect without stranding the
//! rest.
//!
//! Each channel type also has a lifecycle gate, an async mutex the fan-out
//! task holds from before `SubscribeStream` until after `CloseChannel`. A task
//! for a reopened channel waits on it, which keeps the number of open
//! upstream subscriptions per channel type at zero or one and stops a close
//! from overtaking the next subscribe.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::message::{Channel, ChannelType, Demand, Response, RoutedMessage, Supply};
use crate::registry::store::lock;
use crate::registry::{RegistryConfig, SubscriberQueue, SubscriberRegistry};
use crate::stats::FanoutStats;
use crate::upstream::{MessageStream, Upstream, UpstreamResult};

mod task;

use task::FanoutTask;

/// Routed message kinds the multiplexer can subscribe to upstream
///
/// Maps a message type onto the matching pair of [`Upstream`] calls.
pub trait FanoutMessage<U: Upstream>: RoutedMessage {
    /// Upstream stream type for this kind
    type Stream: MessageStream<Self>;

    /// Open the upstream subscription
    fn open(
        upstream: &U,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Self::Stream>> + Send;

    /// Release the upstream subscription
    fn close(
        upstream: &U,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send;
}

impl<U: Upstream> FanoutMessage<U> for Demand {
    type Stream = U::DemandStream;

    fn open(
        upstream: &U,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Self::Stream>> + Send {
        upstream.subscribe_demand(channel)
    }

    fn close(
        upstream: &U,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send {
        upstream.close_demand_channel(channel)
    }
}

impl<U: Upstream> FanoutMessage<U> for Supply {
    type Stream = U::SupplyStream;

    fn open(
        upstream: &U,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Self::Stream>> + Send {
        upstream.subscribe_supply(channel)
    }

    fn close(
        upstream: &U,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send {
        upstream.close_supply_channel(channel)
    }
}

/// Shares upstream subscriptions of one message kind among local subscribers
pub struct ChannelMultiplexer<U: Upstream, M: FanoutMessage<U>> {
    upstream: Arc<U>,
    registry: Arc<SubscriberRegistry<M>>,

    /// Per-channel-type upstream lifecycle gates
    gates: Mutex<HashMap<ChannelType, Arc<AsyncMutex<()>>>>,

    /// Client id the proxy presents upstream
    client_id: u64,
}

impl<U: Upstream, M: FanoutMessage<U>> ChannelMultiplexer<U, M> {
    /// Create a multiplexer over an upstream session
    pub fn new(upstream: Arc<U>, client_id: u64, config: RegistryConfig) -> Self {
        Self {
            upstream,
            registry: Arc::new(SubscriberRegistry::with_config(config)),
            gates: Mutex::new(HashMap::new()),
            client_id,
        }
    }

    /// Get a reference to the subscriber registry
    pub fn registry(&self) -> &Arc<SubscriberRegistry<M>> {
        &self.registry
    }

    /// Fan-out statistics for this kind
    pub fn stats(&self) -> FanoutStats {
        self.registry.stats()
    }

    fn channel(&self, channel_type: ChannelType) -> Channel {
        Channel::new(self.client_id, channel_type)
    }

    fn gate(&self, channel_type: ChannelType) -> Arc<AsyncMutex<()>> {
        Arc::clone(lock(&self.gates).entry(channel_type).or_default())
    }

    /// Subscribe to a channel type
    ///
    /// Returns the caller's queue immediately. If this is the first
    /// subscriber, a fan-out task is spawned to open the upstream
    /// subscription; an upstream failure arrives through the queue. Must be
    /// called from within a Tokio runtime.
    pub fn subscribe(&self, channel_type: ChannelType) -> Result<SubscriberQueue<M>> {
        let registration = self.registry.register(channel_type)?;

        if let Some(lease) = registration.lease {
            let task = FanoutTask {
                upstream: Arc::clone(&self.upstream),
                registry: Arc::clone(&self.registry),
                gate: self.gate(channel_type),
                channel: self.channel(channel_type),
                lease,
            };
            tokio::spawn(task.run());
        }

        Ok(registration.queue)
    }

    /// Force-close a channel type
    ///
    /// Ends every local subscriber's stream, stops the fan-out task, then
    /// forwards one close request upstream. The close is forwarded even if
    /// no local subscriber existed.
    pub async fn close_channel(&self, channel_type: ChannelType) -> Result<Response> {
        self.registry.validate(channel_type)?;

        let closed = self.registry.force_close(channel_type);

        let gate = self.gate(channel_type);
        let _guard = gate.lock().await;

        let response = M::close(&self.upstream, self.channel(channel_type)).await?;
        self.registry.counters().upstream_closed();

        tracing::info!(
            kind = %M::KIND,
            channel_type = channel_type,
            subscribers = closed,
            "Channel closed on request"
        );
        Ok(response)
    }

    /// Close every channel and wait for the fan-out tasks to finish
    ///
    /// Each open upstream subscription is released before this returns.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.shutdown();

        let gates: Vec<_> = lock(&self.gates).values().cloned().collect();
        for gate in gates {
            let _ = gate.lock().await;
        }
        closed
    }
}
