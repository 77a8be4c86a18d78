use std::time::Duration;

use crate::channel::ChannelConfig;

/// Host orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub channel: ChannelConfig,
    /// Bound on connecting and getting the first health answer from the worker.
    pub init_timeout_ms: u64,
}

impl OrchestratorConfig {
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            init_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.init_timeout(), Duration::from_secs(10));
        assert_eq!(config.channel.capacity, 256);
    }
}
