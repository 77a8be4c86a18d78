//! Channel configuration.

use std::time::Duration;

/// Settings for the bounded queues joining the host and worker endpoints.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bounded mpsc capacity for each direction.
    pub capacity: usize,
    /// Maximum time to wait when the peer's queue is full.
    pub send_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            send_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.capacity, 256);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
    }
}
