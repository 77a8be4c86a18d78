use offload_core::HealthReport;

/// Typed health summary returned by `Orchestrator::get_health`.
///
/// Never an error: when the worker cannot be asked, a degraded summary
/// carries the reason in `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerHealth {
    pub is_healthy: bool,
    pub active_operations: usize,
    pub registered_modules: Vec<String>,
    pub total_operations: u64,
    pub uptime_ms: u64,
    pub error: Option<String>,
}

impl WorkerHealth {
    #[must_use]
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

impl From<HealthReport> for WorkerHealth {
    fn from(report: HealthReport) -> Self {
        Self {
            is_healthy: report.is_healthy,
            active_operations: report.active_operations,
            registered_modules: report.registered_modules,
            total_operations: report.metrics.total_operations,
            uptime_ms: report.metrics.uptime_ms,
            error: None,
        }
    }
}
