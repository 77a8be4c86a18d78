//! Metrics middleware for handler invocations.
//!
//! Wraps each invocation in an `operation` span carrying duration and
//! outcome, and bumps `metrics` counters labelled by module and outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use serde_json::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::{Invocation, InvocationError};

/// Counter of finished invocations, labelled `module` and `outcome`.
pub const OPERATIONS_TOTAL: &str = "offload_operations_total";
/// Counter of failed invocations, labelled `module` and `kind`.
pub const OPERATION_ERRORS_TOTAL: &str = "offload_operation_errors_total";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

fn error_kind(err: &InvocationError) -> &'static str {
    match err {
        InvocationError::Module(_) => "module",
        InvocationError::Timeout { .. } => "timeout",
        InvocationError::Overloaded => "overloaded",
        InvocationError::Panicked(_) => "panic",
        InvocationError::Aborted => "aborted",
    }
}

impl<S> Service<Invocation> for MetricsService<S>
where
    S: Service<Invocation, Response = Value, Error = InvocationError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = InvocationError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, InvocationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let module = invocation.module.clone();
        let operation = invocation.operation.clone();

        let span = info_span!(
            "operation",
            operation_id = %invocation.id(),
            module = %module,
            operation = %operation,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(invocation);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(_) => "error",
                };

                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::counter!(
                    OPERATIONS_TOTAL,
                    "module" => module.clone(),
                    "outcome" => outcome
                )
                .increment(1);

                match &result {
                    Ok(_) => tracing::debug!(duration_ms, "operation complete"),
                    Err(err) => {
                        metrics::counter!(
                            OPERATION_ERRORS_TOTAL,
                            "module" => module,
                            "kind" => error_kind(err)
                        )
                        .increment(1);
                        tracing::info!(duration_ms, error = %err, "operation failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use offload_core::messages::Metadata;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::channel::{pair, ChannelConfig};
    use crate::worker::emitter::{OperationHandle, ResponseEmitter};
    use crate::worker::middleware::HandlerService;
    use crate::worker::module::{bound_handler, BoundHandler, ModuleError};

    fn invocation(handler: BoundHandler) -> Invocation {
        let (_host, worker) = pair(&ChannelConfig::default());
        Invocation {
            module: "http".to_string(),
            operation: "get".to_string(),
            data: Value::Null,
            handle: OperationHandle::new(
                "op-m",
                Metadata::new(),
                ResponseEmitter::new(worker.responses),
                CancellationToken::new(),
            ),
            handler,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn passes_value_through() {
        let svc = MetricsLayer.layer(HandlerService);
        let value = svc
            .oneshot(invocation(bound_handler(|_, _| async { Ok(Value::from(200)) })))
            .await
            .unwrap();
        assert_eq!(value, Value::from(200));
    }

    #[tokio::test]
    async fn passes_error_through() {
        let svc = MetricsLayer.layer(HandlerService);
        let err = svc
            .oneshot(invocation(bound_handler(|_, _| async {
                Err(ModuleError::new("upstream down").with_status(503))
            })))
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), "module");
    }
}
