//! Per-channel fan-out task

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::message::Channel;
use crate::registry::entry::Teardown;
use crate::registry::{ChannelLease, SubscriberRegistry};
use crate::upstream::{MessageStream, Upstream};

use super::FanoutMessage;

/// Owns the upstream subscription for one registry entry
pub(super) struct FanoutTask<U: Upstream, M: FanoutMessage<U>> {
    pub upstream: Arc<U>,
    pub registry: Arc<SubscriberRegistry<M>>,
    pub gate: Arc<AsyncMutex<()>>,
    pub channel: Channel,
    pub lease: ChannelLease,
}

impl<U: Upstream, M: FanoutMessage<U>> FanoutTask<U, M> {
    pub async fn run(self) {
        let FanoutTask {
            upstream,
            registry,
            gate,
            channel,
            lease,
        } = self;
        let ChannelLease {
            generation,
            mut teardown,
        } = lease;
        let channel_type = channel.channel_type;

        // Wait for the previous generation to finish closing upstream
        let _gate = gate.lock_owned().await;

        if !registry.is_current(channel_type, generation) {
            tracing::debug!(
                kind = %M::KIND,
                channel_type = channel_type,
                generation = generation,
                "Channel released before upstream subscribe"
            );
            return;
        }

        let mut stream = match M::open(&upstream, channel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                registry.counters().upstream_failed();
                let failed = registry.fail(channel_type, generation, e.clone());
                tracing::error!(
                    kind = %M::KIND,
                    channel_type = channel_type,
                    subscribers = failed,
                    error = %e,
                    "Upstream subscribe failed"
                );
                return;
            }
        };

        registry.counters().upstream_opened();
        if registry.mark_driving(channel_type, generation) {
            tracing::info!(
                kind = %M::KIND,
                channel_type = channel_type,
                generation = generation,
                "Upstream subscription opened"
            );
        }

        loop {
            tokio::select! {
                biased;

                signal = &mut teardown => {
                    // A dropped sender means the entry is gone without a request to release
                    if let Ok(Teardown::Release) = signal {
                        release(&*upstream, &*registry, channel.clone()).await;
                    }
                    break;
                }

                received = stream.recv() => match received {
                    Ok(Some(message)) => {
                        registry.counters().message_received();
                        registry.broadcast(channel_type, generation, message).await;
                    }
                    Ok(None) => {
                        let ended = registry.finish(channel_type, generation);
                        tracing::info!(
                            kind = %M::KIND,
                            channel_type = channel_type,
                            subscribers = ended,
                            "Upstream stream ended"
                        );
                        break;
                    }
                    Err(e) => {
                        registry.counters().upstream_failed();
                        let failed = registry.fail(channel_type, generation, e.clone());
                        tracing::error!(
                            kind = %M::KIND,
                            channel_type = channel_type,
                            subscribers = failed,
                            error = %e,
                            "Upstream stream failed"
                        );
                        break;
                    }
                },
            }
        }
    }
}

async fn release<U: Upstream, M: FanoutMessage<U>>(
    upstream: &U,
    registry: &SubscriberRegistry<M>,
    channel: Channel,
) {
    let channel_type = channel.channel_type;
    match M::close(upstream, channel).await {
        Ok(_) => {
            registry.counters().upstream_closed();
            tracing::info!(
                kind = %M::KIND,
                channel_type = channel_type,
                "Upstream subscription closed"
            );
        }
        Err(e) => {
            tracing::warn!(
                kind = %M::KIND,
                channel_type = channel_type,
                error = %e,
                "Upstream close failed"
            );
        }
    }
}
