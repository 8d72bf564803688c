//! # sx-proxy
//!
//! A reverse proxy between many local consumers and a single upstream
//! demand/supply broker.
//!
//! Local callers see the broker's own RPC surface. Subscriptions are
//! multiplexed: however many local subscribers ask for a channel type, the
//! proxy holds at most one upstream subscription for it, fans every received
//! message out to all of them, and releases the upstream subscription when
//! the last one leaves.
//!
//! ```text
//!   local subscribers            sx-proxy                     broker
//!   ─────────────────   ┌──────────────────────────┐
//!   SubscribeDemand(3) ─┤                          │
//!   SubscribeDemand(3) ─┤  ChannelMultiplexer      ├── SubscribeDemand(3)
//!   SubscribeDemand(3) ─┤   SubscriberRegistry     │   (one stream)
//!                       │                          │
//!   NotifyDemand ───────┤  pass-through ───────────├── NotifyDemand
//!   SubscribeMbus ──────┤  1:1 relay ──────────────├── SubscribeMbus
//!                       └──────────────────────────┘
//! ```
//!
//! The transport is not part of this crate: wire [`proxy::ProxyService`] into
//! an RPC server, implement [`upstream::Upstream`] over the broker client, and
//! drive the process with [`server::ProxyNode`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sx_proxy::message::{Channel, Demand};
//! use sx_proxy::proxy::ProxyService;
//! use sx_proxy::upstream::MemoryBroker;
//!
//! # async fn example() -> sx_proxy::Result<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let proxy = Arc::new(ProxyService::new(Arc::clone(&broker), 1));
//!
//! let (mut tx, mut rx) = tokio::sync::mpsc::channel::<Demand>(16);
//! let subscriber = Arc::clone(&proxy);
//! tokio::spawn(async move { subscriber.subscribe_demand(Channel::new(10, 3), &mut tx).await });
//!
//! proxy.notify_demand(Demand::new(7, 3)).await?;
//! let demand = rx.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fanout;
pub mod message;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod stats;
pub mod upstream;

pub use error::{Error, Result};
pub use fanout::ChannelMultiplexer;
pub use proxy::{DownstreamSink, ProxyService};
pub use registry::{RegistryConfig, SubscriberRegistry};
pub use server::{ProxyConfig, ProxyNode};
pub use upstream::{MemoryBroker, Upstream};
