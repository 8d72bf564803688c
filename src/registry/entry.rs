//! Channel entry and state types
//!
//! This module defines the per-channel-type state stored in the registry.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use super::queue::{CloseReason, QueueSlot, SubscriberId};

/// State of a channel entry
///
/// A channel type without an entry is idle: no local subscribers and no
/// upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// First subscriber registered, upstream subscription being opened
    Opening,
    /// Upstream subscription open, fan-out task delivering
    Driving,
}

/// How the fan-out task should wind down when its entry is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Last subscriber left; release the upstream subscription
    Release,
    /// Channel was force-closed; the closer talks to upstream itself
    Forced,
}

/// Entry for a single channel type in the registry
pub(crate) struct ChannelEntry<M> {
    /// Distinguishes this entry from earlier ones for the same channel type
    pub generation: u64,

    /// Current state
    pub state: ChannelState,

    /// Live subscriber queues, in registration order
    subscribers: Vec<QueueSlot<M>>,

    /// Signal to the fan-out task serving this entry
    teardown: Option<oneshot::Sender<Teardown>>,

    /// When the entry was created
    pub created_at: Instant,
}

impl<M> ChannelEntry<M> {
    /// Create an entry and the receiver its fan-out task listens on
    pub fn new(generation: u64) -> (Self, oneshot::Receiver<Teardown>) {
        let (tx, rx) = oneshot::channel();
        let entry = Self {
            generation,
            state: ChannelState::Opening,
            subscribers: Vec::new(),
            teardown: Some(tx),
            created_at: Instant::now(),
        };
        (entry, rx)
    }

    pub fn push(&mut self, slot: QueueSlot<M>) {
        self.subscribers.push(slot);
    }

    /// Remove a subscriber by id
    pub fn remove(&mut self, id: SubscriberId) -> Option<QueueSlot<M>> {
        let index = self.subscribers.iter().position(|slot| slot.id == id)?;
        Some(self.subscribers.remove(index))
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Clone the write halves for a delivery pass outside the lock
    pub fn targets(&self) -> Vec<(SubscriberId, mpsc::Sender<M>)> {
        self.subscribers
            .iter()
            .map(|slot| (slot.id, slot.tx.clone()))
            .collect()
    }

    /// Tell the fan-out task to stop
    pub fn signal(&mut self, teardown: Teardown) {
        if let Some(tx) = self.teardown.take() {
            // The task may already have exited
            let _ = tx.send(teardown);
        }
    }

    /// Close every queue and return how many there were
    pub fn close_all(&mut self, reason: Option<CloseReason>) -> usize {
        let count = self.subscribers.len();
        for slot in self.subscribers.drain(..) {
            slot.close(reason.clone());
        }
        count
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            subscriber_count: self.subscribers.len(),
            state: self.state,
            generation: self.generation,
            age: self.created_at.elapsed(),
        }
    }
}

/// Statistics for a channel entry
#[derive(Debug, Clone)]
pub struct ChannelStats {
    /// Number of live subscribers
    pub subscriber_count: usize,
    /// Current state
    pub state: ChannelState,
    /// Entry generation (bumps each time the channel is reopened)
    pub generation: u64,
    /// Time since the first subscriber arrived
    pub age: Duration,
}
