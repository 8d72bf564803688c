//! Fan-out statistics

pub mod metrics;

pub use metrics::{FanoutCounters, FanoutStats, ProxyStats};
