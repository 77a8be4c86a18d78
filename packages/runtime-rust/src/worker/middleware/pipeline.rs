//! Pipeline composition: combines all middleware layers into a single service stack.

use serde_json::Value;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::handler::HandlerService;
use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use super::{Invocation, InvocationError};
use crate::worker::config::WorkerConfig;

/// The boxed, clonable invocation stack held by the dispatcher.
pub type InvocationPipeline = BoxCloneService<Invocation, Value, InvocationError>;

/// Wraps `HandlerService` with the middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when too many handlers are running
/// 2. `TimeoutLayer` -- enforce the per-invocation deadline
/// 3. `MetricsLayer` -- record timing and outcome closest to the handler
#[must_use]
pub fn build_invocation_pipeline(config: &WorkerConfig) -> InvocationPipeline {
    BoxCloneService::new(
        ServiceBuilder::new()
            .layer(LoadShedLayer::new(config.max_concurrent_operations))
            .layer(TimeoutLayer)
            .layer(MetricsLayer)
            .service(HandlerService),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use offload_core::messages::Metadata;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::channel::{pair, ChannelConfig};
    use crate::worker::emitter::{OperationHandle, ResponseEmitter};
    use crate::worker::module::bound_handler;

    fn sleeper(delay_ms: u64, timeout_ms: u64) -> Invocation {
        let (_host, worker) = pair(&ChannelConfig::default());
        Invocation {
            module: "background".to_string(),
            operation: "executeTask".to_string(),
            data: Value::Null,
            handle: OperationHandle::new(
                "op-p",
                Metadata::new(),
                ResponseEmitter::new(worker.responses),
                CancellationToken::new(),
            ),
            handler: bound_handler(move |_, _| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(Value::from(delay_ms))
            }),
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn pipeline_runs_handler_through_all_layers() {
        let pipeline = build_invocation_pipeline(&WorkerConfig::default());
        let value = pipeline.oneshot(sleeper(5, 1_000)).await.unwrap();
        assert_eq!(value, Value::from(5));
    }

    #[tokio::test]
    async fn pipeline_enforces_invocation_timeout() {
        let pipeline = build_invocation_pipeline(&WorkerConfig::default());
        let err = pipeline.oneshot(sleeper(500, 20)).await.unwrap_err();
        assert!(matches!(err, InvocationError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn clones_share_the_concurrency_limit() {
        let config = WorkerConfig {
            max_concurrent_operations: 1,
            ..WorkerConfig::default()
        };
        let pipeline = build_invocation_pipeline(&config);
        let running = tokio::spawn(pipeline.clone().oneshot(sleeper(200, 1_000)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = pipeline.clone().oneshot(sleeper(1, 1_000)).await.unwrap_err();
        assert!(matches!(err, InvocationError::Overloaded));
        assert!(running.await.unwrap().is_ok());
    }
}
