//! Subscriber registry implementation
//!
//! One registry exists per message kind. It maps each channel type to the
//! ordered list of local subscriber queues and decides, under its lock,
//! whether a new subscriber is the first one for its channel type (and so
//! needs an upstream subscription opened) or joins an existing fan-out.
//!
//! Invariant: a channel type has an entry iff its upstream subscription is
//! open or being opened. Removing the entry signals the fan-out task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::oneshot;

use crate::error::UpstreamError;
use crate::message::{ChannelType, MessageKind, RoutedMessage};
use crate::stats::{FanoutCounters, FanoutStats};

use super::config::RegistryConfig;
use super::entry::{ChannelEntry, ChannelState, ChannelStats, Teardown};
use super::error::RegistryError;
use super::queue::{CloseReason, SubscriberId, SubscriberQueue};

/// Lock a std mutex, ignoring poisoning
///
/// Critical sections in this crate never panic halfway through an update,
/// so a poisoned guard still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handed to the caller that created a channel entry
///
/// Whoever receives a lease must start the fan-out task for the entry.
pub(crate) struct ChannelLease {
    pub generation: u64,
    pub teardown: oneshot::Receiver<Teardown>,
}

/// Result of [`SubscriberRegistry::register`]
pub(crate) struct Registration<M: RoutedMessage> {
    pub queue: SubscriberQueue<M>,
    pub lease: Option<ChannelLease>,
}

/// Per-kind registry of local subscribers
///
/// Every mutation and every broadcast snapshot happens under one mutex. The
/// lock is never held across an `.await`.
pub struct SubscriberRegistry<M: RoutedMessage> {
    /// Channel type to live subscriber queues
    channels: Mutex<HashMap<ChannelType, ChannelEntry<M>>>,

    next_subscriber_id: AtomicU64,
    next_generation: AtomicU64,

    counters: FanoutCounters,

    config: RegistryConfig,
}

impl<M: RoutedMessage> SubscriberRegistry<M> {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            counters: FanoutCounters::new(),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Message kind served by this registry
    pub fn kind(&self) -> MessageKind {
        M::KIND
    }

    pub(crate) fn counters(&self) -> &FanoutCounters {
        &self.counters
    }

    /// Reject channel types outside `[0, max_channel_type)`
    pub fn validate(&self, channel_type: ChannelType) -> Result<(), RegistryError> {
        if channel_type >= self.config.max_channel_type {
            return Err(RegistryError::ChannelTypeOutOfRange {
                channel_type,
                max: self.config.max_channel_type,
            });
        }
        Ok(())
    }

    /// Register a new subscriber queue for a channel type
    ///
    /// If the channel type had no subscribers a new entry is created and a
    /// lease is returned; the caller must start the fan-out task for it.
    pub(crate) fn register(
        self: &Arc<Self>,
        channel_type: ChannelType,
    ) -> Result<Registration<M>, RegistryError> {
        self.validate(channel_type)?;

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (slot, queue) = SubscriberQueue::pair(
            id,
            channel_type,
            self.config.queue_capacity,
            Arc::clone(self),
        );

        let mut channels = lock(&self.channels);

        let lease = match channels.get_mut(&channel_type) {
            Some(entry) => {
                entry.push(slot);
                tracing::debug!(
                    kind = %M::KIND,
                    channel_type = channel_type,
                    subscriber = id,
                    subscribers = entry.len(),
                    "Subscriber joined existing fan-out"
                );
                None
            }
            None => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (mut entry, teardown) = ChannelEntry::new(generation);
                entry.push(slot);
                channels.insert(channel_type, entry);

                tracing::debug!(
                    kind = %M::KIND,
                    channel_type = channel_type,
                    subscriber = id,
                    generation = generation,
                    "First subscriber, opening channel"
                );
                Some(ChannelLease {
                    generation,
                    teardown,
                })
            }
        };

        Ok(Registration { queue, lease })
    }

    /// Remove a subscriber queue by id
    ///
    /// Returns `false` (and does nothing) if the queue is not registered.
    /// Removing the last queue drops the entry and tells the fan-out task to
    /// release the upstream subscription.
    pub fn unregister(&self, channel_type: ChannelType, id: SubscriberId) -> bool {
        let mut channels = lock(&self.channels);

        let Some(entry) = channels.get_mut(&channel_type) else {
            tracing::debug!(
                kind = %M::KIND,
                channel_type = channel_type,
                subscriber = id,
                "Unregister for idle channel ignored"
            );
            return false;
        };

        let Some(slot) = entry.remove(id) else {
            tracing::debug!(
                kind = %M::KIND,
                channel_type = channel_type,
                subscriber = id,
                "Unregister for unknown subscriber ignored"
            );
            return false;
        };
        slot.close(None);

        tracing::debug!(
            kind = %M::KIND,
            channel_type = channel_type,
            subscriber = id,
            subscribers = entry.len(),
            "Subscriber removed"
        );

        if entry.is_empty() {
            Self::release(&mut channels, channel_type);
        }
        true
    }

    /// Drop an emptied entry and signal its task
    fn release(channels: &mut HashMap<ChannelType, ChannelEntry<M>>, channel_type: ChannelType) {
        if let Some(mut entry) = channels.remove(&channel_type) {
            entry.signal(Teardown::Release);
            tracing::info!(
                kind = %M::KIND,
                channel_type = channel_type,
                generation = entry.generation,
                "Last subscriber left, releasing channel"
            );
        }
    }

    /// True iff the channel type has no subscribers
    pub fn is_empty(&self, channel_type: ChannelType) -> bool {
        !lock(&self.channels).contains_key(&channel_type)
    }

    /// Number of subscribers for a channel type
    pub fn subscriber_count(&self, channel_type: ChannelType) -> usize {
        lock(&self.channels)
            .get(&channel_type)
            .map_or(0, |entry| entry.len())
    }

    /// Number of channel types with subscribers
    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Channel types with subscribers, in ascending order
    pub fn channel_types(&self) -> Vec<ChannelType> {
        let mut types: Vec<_> = lock(&self.channels).keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Current state of a channel type, `None` if idle
    pub fn channel_state(&self, channel_type: ChannelType) -> Option<ChannelState> {
        lock(&self.channels).get(&channel_type).map(|entry| entry.state)
    }

    /// Get channel statistics
    pub fn channel_stats(&self, channel_type: ChannelType) -> Option<ChannelStats> {
        lock(&self.channels)
            .get(&channel_type)
            .map(|entry| entry.stats())
    }

    /// Snapshot of this registry's counters and occupancy
    pub fn stats(&self) -> FanoutStats {
        let mut stats = self.counters.snapshot(M::KIND);
        let channels = lock(&self.channels);
        stats.active_channels = channels.len();
        stats.subscribers = channels.values().map(|entry| entry.len()).sum();
        stats
    }

    /// Whether `generation` still owns the entry for `channel_type`
    pub(crate) fn is_current(&self, channel_type: ChannelType, generation: u64) -> bool {
        lock(&self.channels)
            .get(&channel_type)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Record that the upstream subscription for `generation` is open
    pub(crate) fn mark_driving(&self, channel_type: ChannelType, generation: u64) -> bool {
        let mut channels = lock(&self.channels);
        match channels.get_mut(&channel_type) {
            Some(entry) if entry.generation == generation => {
                entry.state = ChannelState::Driving;
                true
            }
            _ => false,
        }
    }

    /// Deliver a message to every subscriber of a channel type
    ///
    /// The subscriber list is snapshotted under the lock and the pushes run
    /// outside it, one queue at a time, stopping early if the entry is closed
    /// meanwhile. A queue that stays full longer than `send_timeout` is
    /// evicted. Returns the number of subscribers left.
    pub(crate) async fn broadcast(
        &self,
        channel_type: ChannelType,
        generation: u64,
        message: M,
    ) -> usize {
        let targets = {
            let channels = lock(&self.channels);
            match channels.get(&channel_type) {
                Some(entry) if entry.generation == generation => entry.targets(),
                _ => return 0,
            }
        };

        let mut delivered = 0u64;
        let mut evicted = Vec::new();

        for (id, tx) in targets {
            // Stop pushing once the entry was closed or replaced mid-pass
            if !self.is_current(channel_type, generation) {
                break;
            }
            match tx.send_timeout(message.clone(), self.config.send_timeout).await {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => evicted.push(id),
                // Subscriber dropped its queue; its Drop already unregistered it
                Err(SendTimeoutError::Closed(_)) => {}
            }
        }

        self.counters.delivered(delivered);

        let mut channels = lock(&self.channels);
        let Some(entry) = channels
            .get_mut(&channel_type)
            .filter(|entry| entry.generation == generation)
        else {
            return 0;
        };

        for id in evicted {
            if let Some(slot) = entry.remove(id) {
                slot.close(Some(CloseReason::Evicted));
                self.counters.evicted(1);
                tracing::warn!(
                    kind = %M::KIND,
                    channel_type = channel_type,
                    subscriber = id,
                    timeout_ms = self.config.send_timeout.as_millis() as u64,
                    "Subscriber queue full, disconnecting slow consumer"
                );
            }
        }

        let remaining = entry.len();
        if remaining == 0 {
            Self::release(&mut channels, channel_type);
        }
        remaining
    }

    /// End every subscriber of `generation` after upstream end of stream
    pub(crate) fn finish(&self, channel_type: ChannelType, generation: u64) -> usize {
        self.remove_generation(channel_type, generation, None)
    }

    /// Fail every subscriber of `generation` with an upstream error
    pub(crate) fn fail(
        &self,
        channel_type: ChannelType,
        generation: u64,
        error: UpstreamError,
    ) -> usize {
        self.remove_generation(
            channel_type,
            generation,
            Some(CloseReason::UpstreamFailed(error)),
        )
    }

    fn remove_generation(
        &self,
        channel_type: ChannelType,
        generation: u64,
        reason: Option<CloseReason>,
    ) -> usize {
        let mut channels = lock(&self.channels);
        match channels.get(&channel_type) {
            Some(entry) if entry.generation == generation => {}
            _ => return 0,
        }
        channels
            .remove(&channel_type)
            .map_or(0, |mut entry| entry.close_all(reason))
    }

    /// Close every queue of a channel type at once
    ///
    /// Subscribers see a clean end of stream. The fan-out task stops without
    /// releasing upstream; the caller forwards the close itself. Returns the
    /// number of subscribers closed.
    ///
    /// A broadcast already blocked on one of these queues finishes that push
    /// (or times out) before it notices, so that subscriber may still get one
    /// last message. No further queue of the closed entry is pushed to.
    pub fn force_close(&self, channel_type: ChannelType) -> usize {
        let mut channels = lock(&self.channels);
        let Some(mut entry) = channels.remove(&channel_type) else {
            return 0;
        };

        entry.signal(Teardown::Forced);
        let closed = entry.close_all(None);

        tracing::info!(
            kind = %M::KIND,
            channel_type = channel_type,
            subscribers = closed,
            "Channel force-closed"
        );
        closed
    }

    /// Close every channel, releasing all upstream subscriptions
    pub fn shutdown(&self) -> usize {
        let mut channels = lock(&self.channels);
        let mut closed = 0;
        for (_, mut entry) in channels.drain() {
            entry.signal(Teardown::Release);
            closed += entry.close_all(None);
        }
        if closed > 0 {
            tracing::info!(kind = %M::KIND, subscribers = closed, "Registry shut down");
        }
        closed
    }
}

impl<M: RoutedMessage> Default for SubscriberRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
