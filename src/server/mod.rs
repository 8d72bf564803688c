//! Proxy process surface: configuration and node lifecycle

pub mod config;
pub mod node;

pub use config::ProxyConfig;
pub use node::{
    NodeAssignment, NodeDirectory, NodeRegistration, NodeType, ProxyNode, UpstreamConnector,
};
