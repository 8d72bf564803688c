//! Proxy process configuration

use std::net::{Ipv4Addr, SocketAddr};

use crate::message::ChannelType;
use crate::registry::RegistryConfig;

/// Default proxy listening port
pub const DEFAULT_PORT: u16 = 18000;

/// Default directory service address
pub const DEFAULT_NODE_SERVER: &str = "127.0.0.1:9990";

/// Proxy configuration options
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address local callers connect to
    pub listen_addr: SocketAddr,

    /// Directory service ("node server") address
    pub node_server: String,

    /// Cluster the node registers into
    pub cluster_id: i32,

    /// Area the node registers into
    pub area_id: String,

    /// Channel types announced at registration
    pub channel_types: Vec<ChannelType>,

    /// Provider display name
    pub name: String,

    /// Log at debug level by default
    pub verbose: bool,

    /// Subscriber registry settings
    pub registry: RegistryConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            node_server: DEFAULT_NODE_SERVER.to_string(),
            cluster_id: 0,
            area_id: "Default".to_string(),
            channel_types: vec![1],
            name: "Proxy".to_string(),
            verbose: false,
            registry: RegistryConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Set the listening port, keeping the bind address
    pub fn port(mut self, port: u16) -> Self {
        self.listen_addr.set_port(port);
        self
    }

    /// Set the full listening address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the directory service address
    pub fn node_server(mut self, addr: impl Into<String>) -> Self {
        self.node_server = addr.into();
        self
    }

    /// Set the cluster id
    pub fn cluster_id(mut self, id: i32) -> Self {
        self.cluster_id = id;
        self
    }

    /// Announce a single channel type
    pub fn channel(mut self, channel_type: ChannelType) -> Self {
        self.channel_types = vec![channel_type];
        self
    }

    /// Announce several channel types
    pub fn channels(mut self, channel_types: impl IntoIterator<Item = ChannelType>) -> Self {
        self.channel_types = channel_types.into_iter().collect();
        self
    }

    /// Set the provider display name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable verbose logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set registry options
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Default `tracing` filter directive for this configuration
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "sx_proxy=debug,info"
        } else {
            "info"
        }
    }
}
