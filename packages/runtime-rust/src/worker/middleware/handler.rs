//! Innermost service: runs a bound handler in its own task.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio_util::task::AbortOnDropHandle;
use tower::Service;

use super::{Invocation, InvocationError};

/// Spawns each handler so that a panic surfaces as a `JoinError` instead of
/// unwinding through the dispatcher. Dropping the returned future (e.g. on
/// timeout) aborts the task.
#[derive(Debug, Clone, Default)]
pub struct HandlerService;

impl Service<Invocation> for HandlerService {
    type Response = Value;
    type Error = InvocationError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, InvocationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let Invocation {
            data,
            handle,
            handler,
            ..
        } = invocation;
        // Calling the handler inside the task also captures panics raised
        // before it returns its future.
        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            handler(data, handle).await
        }));

        Box::pin(async move {
            match task.await {
                Ok(result) => result.map_err(InvocationError::Module),
                Err(err) if err.is_panic() => {
                    Err(InvocationError::Panicked(panic_message(&*err.into_panic())))
                }
                Err(_) => Err(InvocationError::Aborted),
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "handler panicked".to_string()
    }
}
