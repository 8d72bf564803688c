//! Subscriber registry for fan-out routing
//!
//! The registry tracks which local subscribers are attached to which channel
//! type. It is the only shared mutable state in the proxy; one instance
//! exists per message kind so demand and supply traffic never contend.
//!
//! # Architecture
//!
//! ```text
//!                    Arc<SubscriberRegistry<M>>
//!                 ┌──────────────────────────────┐
//!                 │ channels: HashMap<ChannelType│
//!                 │   ChannelEntry {             │
//!                 │     subscribers: [QueueSlot],│
//!                 │     teardown: oneshot::Tx,   │
//!                 │   }                          │
//!                 │ >                            │
//!                 └──────────────┬───────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!  [fan-out task]        [SubscriberQueue]       [SubscriberQueue]
//!  upstream.recv()          queue.recv()            queue.recv()
//!        │                       │                       │
//!        └──► registry.broadcast()──► sink.send() ──► downstream
//! ```
//!
//! Queues are bounded; a subscriber that lets its queue stay full for
//! longer than [`RegistryConfig::send_timeout`] is disconnected rather than
//! stalling everyone else on the channel.

pub mod config;
pub mod entry;
pub mod error;
pub mod queue;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ChannelState, ChannelStats};
pub use error::RegistryError;
pub use queue::{SubscriberId, SubscriberQueue};
pub use store::SubscriberRegistry;

pub(crate) use store::ChannelLease;
