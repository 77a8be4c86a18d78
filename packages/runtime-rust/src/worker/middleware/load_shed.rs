//! Load shedding middleware for handler invocations.
//!
//! Caps concurrently running handlers with a semaphore. When no permit is
//! available the invocation fails immediately with
//! `InvocationError::Overloaded` instead of queueing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use super::{Invocation, InvocationError};

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<Invocation> for LoadShedService<S>
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
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            tracing::warn!(operation_id = %invocation.id(), "shedding invocation");
            return Box::pin(async { Err(InvocationError::Overloaded) });
        };

        let fut = self.inner.call(invocation);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
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
    use crate::worker::middleware::HandlerService;
    use crate::worker::module::bound_handler;

    fn sleeper(id: &str, delay_ms: u64) -> Invocation {
        let (_host, worker) = pair(&ChannelConfig::default());
        Invocation {
            module: "background".to_string(),
            operation: "executeTask".to_string(),
            data: Value::Null,
            handle: OperationHandle::new(
                id,
                Metadata::new(),
                ResponseEmitter::new(worker.responses),
                CancellationToken::new(),
            ),
            handler: bound_handler(move |_, _| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(Value::Null)
            }),
            timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn allows_within_capacity() {
        let svc = LoadShedLayer::new(2).layer(HandlerService);
        assert!(svc.oneshot(sleeper("a", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn sheds_when_at_capacity() {
        let layer = LoadShedLayer::new(1);
        let first = layer.layer(HandlerService).oneshot(sleeper("a", 200));
        let running = tokio::spawn(first);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = layer
            .layer(HandlerService)
            .oneshot(sleeper("b", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Overloaded));

        assert!(running.await.unwrap().is_ok());
        assert!(layer.layer(HandlerService).oneshot(sleeper("c", 1)).await.is_ok());
    }
}
