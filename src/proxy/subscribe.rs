//! Fan-out subscriptions and channel close

use crate::error::Result;
use crate::message::{Channel, Demand, Response, RoutedMessage, Supply};
use crate::registry::SubscriberQueue;
use crate::upstream::Upstream;

use super::{DownstreamSink, ProxyService};

impl<U: Upstream> ProxyService<U> {
    /// `SubscribeDemand`: stream demands of one channel type to `sink`
    ///
    /// Returns `Ok(())` when the channel ends (upstream end of stream or a
    /// forced close) and an error when the upstream subscription fails, the
    /// subscriber is evicted, or `sink` rejects a message.
    pub async fn subscribe_demand<S>(&self, channel: Channel, sink: &mut S) -> Result<()>
    where
        S: DownstreamSink<Demand>,
    {
        let queue = self.demand.subscribe(channel.channel_type)?;
        tracing::debug!(
            client_id = channel.client_id,
            channel_type = channel.channel_type,
            subscriber = queue.id(),
            "Demand subscriber connected"
        );
        drain(queue, sink).await
    }

    /// `SubscribeSupply`: stream supplies of one channel type to `sink`
    pub async fn subscribe_supply<S>(&self, channel: Channel, sink: &mut S) -> Result<()>
    where
        S: DownstreamSink<Supply>,
    {
        let queue = self.supply.subscribe(channel.channel_type)?;
        tracing::debug!(
            client_id = channel.client_id,
            channel_type = channel.channel_type,
            subscriber = queue.id(),
            "Supply subscriber connected"
        );
        drain(queue, sink).await
    }

    /// `CloseDemandChannel`: end every local demand subscriber of the
    /// channel type and forward the close upstream
    pub async fn close_demand_channel(&self, channel: Channel) -> Result<Response> {
        self.demand.close_channel(channel.channel_type).await
    }

    /// `CloseSupplyChannel`: end every local supply subscriber of the
    /// channel type and forward the close upstream
    pub async fn close_supply_channel(&self, channel: Channel) -> Result<Response> {
        self.supply.close_channel(channel.channel_type).await
    }
}

/// Forward queued messages downstream until the queue ends
///
/// A write that is still pending when the queue is evicted is abandoned and
/// the subscription ends with [`Error::SlowConsumer`](crate::error::Error::SlowConsumer).
async fn drain<M, S>(mut queue: SubscriberQueue<M>, sink: &mut S) -> Result<()>
where
    M: RoutedMessage,
    S: DownstreamSink<M>,
{
    let channel_type = queue.channel_type();
    let subscriber = queue.id();

    while let Some(message) = queue.recv().await? {
        let sent = tokio::select! {
            biased;

            sent = sink.send(message) => sent,
            err = queue.evicted() => {
                tracing::debug!(
                    kind = %M::KIND,
                    channel_type = channel_type,
                    subscriber = subscriber,
                    "Evicted while blocked downstream"
                );
                return Err(err);
            }
        };

        if let Err(e) = sent {
            queue.downstream_failed();
            tracing::debug!(
                kind = %M::KIND,
                channel_type = channel_type,
                subscriber = subscriber,
                error = %e,
                "Downstream send failed, subscriber removed"
            );
            return Err(e.into());
        }
    }

    tracing::debug!(
        kind = %M::KIND,
        channel_type = channel_type,
        subscriber = subscriber,
        "Subscription ended"
    );
    Ok(())
}
