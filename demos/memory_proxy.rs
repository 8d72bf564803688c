//! In-process proxy demo
//!
//! Run with: cargo run --example memory_proxy [--verbose]
//!
//! Registers a proxy node against an in-memory directory, connects it to a
//! [`MemoryBroker`], attaches three local demand subscribers to one channel
//! type and publishes a few demands through the proxy. The broker only ever
//! sees one subscription for the channel type.
//!
//! Press Ctrl+C to stop early.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use sx_proxy::message::{Channel, Demand, MessageKind};
use sx_proxy::server::node::{NodeAssignment, NodeDirectory, NodeRegistration, UpstreamConnector};
use sx_proxy::upstream::UpstreamResult;
use sx_proxy::{MemoryBroker, ProxyConfig, ProxyNode};

const CHANNEL_TYPE: u32 = 3;

/// Directory that hands out sequential node ids
struct LocalDirectory {
    next_id: AtomicU64,
}

impl NodeDirectory for LocalDirectory {
    async fn register_node(
        &self,
        node_server: &str,
        registration: NodeRegistration,
    ) -> UpstreamResult<NodeAssignment> {
        let node_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!(
            "Registered {} ({:?}) with {} as node {} for channels {:?}",
            registration.name,
            registration.node_type,
            node_server,
            node_id,
            registration.channel_types
        );
        Ok(NodeAssignment {
            node_id,
            server_address: "memory".into(),
        })
    }

    async fn unregister_node(&self, node_id: u64) -> UpstreamResult<()> {
        println!("Unregistered node {}", node_id);
        Ok(())
    }
}

/// Connector that always returns the same broker
struct LocalConnector {
    broker: Arc<MemoryBroker>,
}

impl UpstreamConnector for LocalConnector {
    type Upstream = MemoryBroker;

    async fn connect(
        &self,
        _server_address: &str,
        _node_id: u64,
    ) -> UpstreamResult<Arc<MemoryBroker>> {
        Ok(Arc::clone(&self.broker))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let verbose = std::env::args().any(|a| a == "--verbose" || a == "-v");

    let config = ProxyConfig::default()
        .name("DemoProxy")
        .channel(CHANNEL_TYPE)
        .verbose(verbose);

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter())),
        )
        .init();

    let broker = Arc::new(MemoryBroker::new());
    let directory = LocalDirectory {
        next_id: AtomicU64::new(1),
    };
    let connector = LocalConnector {
        broker: Arc::clone(&broker),
    };

    let node = ProxyNode::bootstrap(config, directory, &connector).await?;
    let service = Arc::clone(node.service());

    let session = {
        let service = Arc::clone(&service);
        let broker = Arc::clone(&broker);
        async move {
            let mut receivers = Vec::new();
            for subscriber in 0..3u64 {
                let (tx, rx) = mpsc::channel::<Demand>(16);
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let mut sink = tx;
                    let channel = Channel::new(100 + subscriber, CHANNEL_TYPE);
                    if let Err(e) = service.subscribe_demand(channel, &mut sink).await {
                        eprintln!("Subscriber {} ended: {}", subscriber, e);
                    }
                });
                receivers.push(rx);
            }

            while broker.open_streams(MessageKind::Demand, CHANNEL_TYPE) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            for id in 1..=3 {
                let mut demand = Demand::new(id, CHANNEL_TYPE);
                demand.name = format!("ride-{}", id);
                service.notify_demand(demand).await?;
            }

            for (subscriber, rx) in receivers.iter_mut().enumerate() {
                for _ in 0..3 {
                    if let Some(demand) = rx.recv().await {
                        println!(
                            "Subscriber {} got demand {} ({})",
                            subscriber, demand.id, demand.name
                        );
                    }
                }
            }

            let stats = service.stats();
            println!();
            println!(
                "Upstream subscribe calls: {}",
                broker.subscribe_calls(MessageKind::Demand, CHANNEL_TYPE)
            );
            println!("Local subscribers:        {}", stats.total_subscribers());
            println!("Messages received:        {}", stats.demand.messages_received);
            println!("Deliveries:               {}", stats.demand.deliveries);
            Ok::<(), sx_proxy::Error>(())
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nShutting down...");
    };

    node.run_until(session, shutdown).await?;

    println!(
        "Upstream close calls:     {}",
        broker.close_calls(MessageKind::Demand, CHANNEL_TYPE)
    );
    Ok(())
}
