//! Per-subscriber bounded queues
//!
//! Each local subscriber owns one [`SubscriberQueue`]. The registry keeps the
//! matching write half ([`QueueSlot`]) in the channel entry; only the fan-out
//! task for that channel pushes into it, so every subscriber observes messages
//! in upstream order.
//!
//! When the registry drops a slot it may first record a [`CloseReason`]. The
//! subscriber drains whatever is already queued and then sees the reason
//! instead of a clean end of stream. Eviction is also signalled directly, so
//! a handler stuck writing to a client that stopped reading can give up.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result, UpstreamError};
use crate::message::{ChannelType, RoutedMessage};

use super::store::{lock, SubscriberRegistry};

/// Identifier of one subscription, unique within a registry
pub type SubscriberId = u64;

/// Why the registry closed a queue, if not a clean end of channel
#[derive(Debug, Clone)]
pub(crate) enum CloseReason {
    /// Queue stayed full past the send timeout
    Evicted,
    /// Upstream subscription failed
    UpstreamFailed(UpstreamError),
}

/// State shared between the read half and the registry's slot
#[derive(Debug, Default)]
pub(crate) struct QueueShared {
    reason: Mutex<Option<CloseReason>>,
    evicted: Notify,
}

impl QueueShared {
    fn set_reason(&self, reason: CloseReason) {
        let evicted = matches!(reason, CloseReason::Evicted);
        {
            let mut slot = lock(&self.reason);
            if slot.is_some() {
                return;
            }
            *slot = Some(reason);
        }
        if evicted {
            // Stores a permit if nobody is waiting yet
            self.evicted.notify_one();
        }
    }

    fn take_reason(&self) -> Option<CloseReason> {
        lock(&self.reason).take()
    }
}

/// Write half of a subscriber queue, owned by the registry entry
#[derive(Debug)]
pub(crate) struct QueueSlot<M> {
    pub(crate) id: SubscriberId,
    pub(crate) tx: mpsc::Sender<M>,
    shared: Arc<QueueShared>,
}

impl<M> QueueSlot<M> {
    /// Drop the write half, recording why
    pub(crate) fn close(self, reason: Option<CloseReason>) {
        if let Some(reason) = reason {
            self.shared.set_reason(reason);
        }
    }
}

/// Read half of a subscription
///
/// Dropping the queue unregisters it, so a downstream handler that is
/// cancelled mid-stream never leaves a stale entry behind.
pub struct SubscriberQueue<M: RoutedMessage> {
    id: SubscriberId,
    channel_type: ChannelType,
    rx: mpsc::Receiver<M>,
    shared: Arc<QueueShared>,
    registry: Arc<SubscriberRegistry<M>>,
    registered: bool,
}

impl<M: RoutedMessage> SubscriberQueue<M> {
    /// Create a connected read/write pair
    pub(crate) fn pair(
        id: SubscriberId,
        channel_type: ChannelType,
        capacity: usize,
        registry: Arc<SubscriberRegistry<M>>,
    ) -> (QueueSlot<M>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(QueueShared::default());

        let slot = QueueSlot {
            id,
            tx,
            shared: Arc::clone(&shared),
        };
        let queue = Self {
            id,
            channel_type,
            rx,
            shared,
            registry,
            registered: true,
        };

        (slot, queue)
    }

    /// Subscriber id
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Channel type this queue is subscribed to
    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// Wait for the next message
    ///
    /// Returns `Ok(None)` once the channel has ended (upstream end of stream
    /// or a forced close). Returns an error if the queue was evicted for
    /// being too slow or the upstream subscription failed; queued messages
    /// are always delivered first.
    pub async fn recv(&mut self) -> Result<Option<M>> {
        match self.rx.recv().await {
            Some(message) => Ok(Some(message)),
            None => {
                self.registered = false;
                match self.shared.take_reason() {
                    None => Ok(None),
                    Some(CloseReason::Evicted) => Err(Error::SlowConsumer {
                        kind: M::KIND,
                        channel_type: self.channel_type,
                    }),
                    Some(CloseReason::UpstreamFailed(e)) => Err(Error::Upstream(e)),
                }
            }
        }
    }

    /// Wait until the registry evicts this queue
    ///
    /// Resolves even while the caller is blocked on its downstream write.
    /// The queue is already out of the registry when this returns; anything
    /// still buffered is abandoned.
    pub async fn evicted(&mut self) -> Error {
        self.shared.evicted.notified().await;
        self.registered = false;
        self.rx.close();
        Error::SlowConsumer {
            kind: M::KIND,
            channel_type: self.channel_type,
        }
    }

    /// Remove this queue from the registry
    ///
    /// Idempotent. If this was the last subscriber of its channel type the
    /// upstream subscription is released.
    pub fn unregister(&mut self) {
        if std::mem::take(&mut self.registered) {
            self.registry.unregister(self.channel_type, self.id);
        }
        self.rx.close();
    }
}

impl<M: RoutedMessage> SubscriberQueue<M> {
    /// Remove this queue after its downstream stream rejected a message
    pub fn downstream_failed(&mut self) {
        self.registry.counters().send_failed();
        self.unregister();
    }
}

impl<M: RoutedMessage> Drop for SubscriberQueue<M> {
    fn drop(&mut self) {
        if self.registered {
            self.registry.unregister(self.channel_type, self.id);
        }
    }
}

impl<M: RoutedMessage> std::fmt::Debug for SubscriberQueue<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberQueue")
            .field("kind", &M::KIND)
            .field("id", &self.id)
            .field("channel_type", &self.channel_type)
            .field("registered", &self.registered)
            .finish()
    }
}
