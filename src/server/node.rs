//! Node lifecycle
//!
//! Before serving, the proxy registers itself with the directory service,
//! which assigns it a node id and tells it which broker to use. On shutdown
//! it releases every upstream subscription and unregisters. Registration
//! failure is fatal: without a broker there is nothing to proxy.

use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::message::ChannelType;
use crate::proxy::ProxyService;
use crate::server::config::ProxyConfig;
use crate::upstream::{Upstream, UpstreamResult};

/// Role a node registers as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Provider of demand/supply traffic (what the proxy presents as)
    Provider,
    /// Broker
    Server,
    /// Gateway between brokers
    Gateway,
}

/// Registration request sent to the directory service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistration {
    /// Display name
    pub name: String,
    /// Node role
    pub node_type: NodeType,
    /// Cluster id
    pub cluster_id: i32,
    /// Area id
    pub area_id: String,
    /// Channel types this node will use
    pub channel_types: Vec<ChannelType>,
}

impl NodeRegistration {
    /// Build the provider registration for a proxy configuration
    pub fn for_proxy(config: &ProxyConfig) -> Self {
        Self {
            name: config.name.clone(),
            node_type: NodeType::Provider,
            cluster_id: config.cluster_id,
            area_id: config.area_id.clone(),
            channel_types: config.channel_types.clone(),
        }
    }
}

/// Directory service answer to a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAssignment {
    /// Node id, used as the proxy's client id upstream
    pub node_id: u64,
    /// Broker address to connect to
    pub server_address: String,
}

/// Directory service ("node server") client
pub trait NodeDirectory: Send + Sync {
    /// Register with the directory service at `node_server`
    fn register_node(
        &self,
        node_server: &str,
        registration: NodeRegistration,
    ) -> impl Future<Output = UpstreamResult<NodeAssignment>> + Send;

    fn unregister_node(&self, node_id: u64) -> impl Future<Output = UpstreamResult<()>> + Send;
}

/// Opens the upstream broker session
pub trait UpstreamConnector: Send + Sync {
    type Upstream: Upstream;

    fn connect(
        &self,
        server_address: &str,
        node_id: u64,
    ) -> impl Future<Output = UpstreamResult<Arc<Self::Upstream>>> + Send;
}

/// A registered proxy node
pub struct ProxyNode<D: NodeDirectory, U: Upstream> {
    config: ProxyConfig,
    directory: D,
    assignment: NodeAssignment,
    service: Arc<ProxyService<U>>,
}

impl<D: NodeDirectory, U: Upstream> ProxyNode<D, U> {
    /// Register with the directory service and connect to the broker
    ///
    /// Any failure here is returned as [`Error::Registration`].
    pub async fn bootstrap<C>(config: ProxyConfig, directory: D, connector: &C) -> Result<Self>
    where
        C: UpstreamConnector<Upstream = U>,
    {
        let registration = NodeRegistration::for_proxy(&config);
        let assignment = directory
            .register_node(&config.node_server, registration)
            .await
            .map_err(|e| {
                Error::Registration(format!("node server {}: {}", config.node_server, e))
            })?;

        tracing::info!(
            node_id = assignment.node_id,
            server = %assignment.server_address,
            name = %config.name,
            "Connecting server"
        );

        let upstream = connector
            .connect(&assignment.server_address, assignment.node_id)
            .await
            .map_err(|e| {
                Error::Registration(format!(
                    "cannot connect to {}: {}",
                    assignment.server_address, e
                ))
            })?;

        let service = Arc::new(ProxyService::with_config(
            upstream,
            assignment.node_id,
            config.registry.clone(),
        ));

        Ok(Self {
            config,
            directory,
            assignment,
            service,
        })
    }

    /// The proxy service to hand to the transport
    pub fn service(&self) -> &Arc<ProxyService<U>> {
        &self.service
    }

    /// Registration result
    pub fn assignment(&self) -> &NodeAssignment {
        &self.assignment
    }

    /// Node configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until the transport stops or shutdown is signalled
    ///
    /// `serve` is the transport's accept loop. Deferred cleanup runs in both
    /// cases; the transport's error, if any, is returned afterwards.
    pub async fn run_until<S, F>(self, serve: S, shutdown: F) -> Result<()>
    where
        S: Future<Output = Result<()>>,
        F: Future<Output = ()>,
    {
        tracing::info!(
            addr = %self.config.listen_addr,
            node_id = self.assignment.node_id,
            "Proxy serving"
        );

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = serve => {
                if let Err(ref e) = result {
                    tracing::error!(error = %e, "Listener stopped");
                } else {
                    tracing::warn!("Listener stopped");
                }
                result
            }
        };

        self.cleanup().await;
        result
    }

    /// Release every subscription and unregister from the directory service
    pub async fn cleanup(&self) {
        self.service.shutdown().await;

        if let Err(e) = self.directory.unregister_node(self.assignment.node_id).await {
            tracing::warn!(
                node_id = self.assignment.node_id,
                error = %e,
                "Failed to unregister node"
            );
        } else {
            tracing::info!(node_id = self.assignment.node_id, "Node unregistered");
        }
    }
}
