use std::time::Duration;

/// Worker-level configuration for the dispatcher.
///
/// Controls handler timeouts, concurrency limits, and teardown draining.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Timeout applied when a request carries no `timeout` metadata.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrently running handlers before load shedding.
    pub max_concurrent_operations: u32,
    /// How long a `dispose` request waits for in-flight handlers to finish.
    pub drain_timeout_ms: u64,
}

impl WorkerConfig {
    #[must_use]
    pub fn default_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.default_operation_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            drain_timeout_ms: 5_000,
        }
    }
}
