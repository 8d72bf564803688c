//! Registry configuration

use std::time::Duration;

/// Default capacity of each subscriber queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default time a full subscriber queue may block the fan-out before eviction
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound (exclusive) for channel types
pub const DEFAULT_MAX_CHANNEL_TYPE: u32 = 256;

/// Configuration for a [`SubscriberRegistry`](super::SubscriberRegistry)
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Messages buffered per subscriber before the fan-out has to wait
    pub queue_capacity: usize,

    /// How long the fan-out waits on one full queue before evicting it
    pub send_timeout: Duration,

    /// Channel types must be below this value
    pub max_channel_type: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_channel_type: DEFAULT_MAX_CHANNEL_TYPE,
        }
    }
}

impl RegistryConfig {
    /// Set the per-subscriber queue capacity (minimum 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the slow-consumer send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the exclusive channel type bound
    pub fn max_channel_type(mut self, max: u32) -> Self {
        self.max_channel_type = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.max_channel_type, 256);
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .queue_capacity(0)
            .send_timeout(Duration::from_millis(50))
            .max_channel_type(16);

        // Zero capacity would make every push block forever
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.send_timeout, Duration::from_millis(50));
        assert_eq!(config.max_channel_type, 16);
    }
}
