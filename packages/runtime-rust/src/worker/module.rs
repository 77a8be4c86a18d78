//! The contract a capability module implements to be dispatched.
//!
//! A module declares its handlers in an explicit [`HandlerTable`]. Each entry
//! is keyed by the conventional handler name (`handle` + capitalised
//! operation), and the dispatcher derives the same name from an incoming
//! request's `operation` to find it. A handler returns the single terminal
//! value for its operation; progress and stream events go through the
//! [`OperationHandle`] it receives.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use offload_core::{codes, WorkerError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::emitter::OperationHandle;

// ---------------------------------------------------------------------------
// ModuleError
// ---------------------------------------------------------------------------

/// Failure returned by a module handler.
///
/// `status` is an optional HTTP-like status used only for retry
/// classification; it never travels on the wire by itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ModuleError {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
    pub details: Option<HashMap<String, Value>>,
}

impl ModuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: HashMap<String, Value>) -> Self {
        self.details = Some(details);
        self
    }

    /// Errors without a status (network-level failures), server errors,
    /// request timeouts (408) and throttling (429) are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => status >= 500 || status == 408 || status == 429,
        }
    }

    #[must_use]
    pub fn into_worker_error(self) -> WorkerError {
        let mut err = WorkerError::new(self.message);
        err.code = self.code;
        err.details = self.details;
        err
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid payload: {err}")).with_code(codes::INVALID_PAYLOAD)
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

pub type HandlerResult = Result<Value, ModuleError>;
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// A handler already bound to its module instance, ready to invoke once.
pub type BoundHandler = Box<dyn FnOnce(Value, OperationHandle) -> HandlerFuture + Send>;

type ErasedHandler<M> = Arc<dyn Fn(Arc<M>, Value, OperationHandle) -> HandlerFuture + Send + Sync>;

/// Deserializes a request payload into a handler's input type.
///
/// # Errors
///
/// Returns an `INVALID_PAYLOAD` error when the payload has the wrong shape.
pub fn parse_payload<T: DeserializeOwned>(data: Value) -> Result<T, ModuleError> {
    Ok(serde_json::from_value(data)?)
}

/// Serializes a handler's output into the terminal payload.
///
/// # Errors
///
/// Returns an `INVALID_PAYLOAD` error if the value cannot be represented as JSON.
pub fn to_payload<T: Serialize>(value: &T) -> HandlerResult {
    Ok(serde_json::to_value(value)?)
}

/// Boxes a one-shot handler closure into a [`BoundHandler`].
pub fn bound_handler<F, Fut>(handler: F) -> BoundHandler
where
    F: FnOnce(Value, OperationHandle) -> Fut + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Box::new(move |data: Value, handle: OperationHandle| -> HandlerFuture {
        Box::pin(handler(data, handle))
    })
}

/// Derives the handler name for an operation: `get` -> `handleGet`.
#[must_use]
pub fn handler_name(operation: &str) -> String {
    let mut chars = operation.chars();
    match chars.next() {
        Some(first) => format!("handle{}{}", first.to_uppercase(), chars.as_str()),
        None => "handle".to_string(),
    }
}

// ---------------------------------------------------------------------------
// HandlerTable
// ---------------------------------------------------------------------------

/// Explicit operation-to-handler map for one module type.
pub struct HandlerTable<M> {
    handlers: HashMap<String, ErasedHandler<M>>,
}

impl<M: Send + Sync + 'static> HandlerTable<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `operation`. Registering the same operation
    /// twice keeps the later handler.
    #[must_use]
    pub fn on<F, Fut>(mut self, operation: &str, handler: F) -> Self
    where
        F: Fn(Arc<M>, Value, OperationHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let erased: ErasedHandler<M> = Arc::new(
            move |module: Arc<M>, data: Value, handle: OperationHandle| -> HandlerFuture {
                Box::pin(handler(module, data, handle))
            },
        );
        self.handlers.insert(handler_name(operation), erased);
        self
    }

    fn get(&self, handler_name: &str) -> Option<&ErasedHandler<M>> {
        self.handlers.get(handler_name)
    }

    /// Handler names in sorted order.
    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<M: Send + Sync + 'static> Default for HandlerTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// WorkerModule / DispatchTarget
// ---------------------------------------------------------------------------

/// A capability module: a named group of operation handlers.
pub trait WorkerModule: Send + Sync + Sized + 'static {
    /// Name the module reports for itself (shown by `listModules`).
    fn module_name(&self) -> &str;

    /// The module's handlers.
    fn handlers() -> HandlerTable<Self>;
}

/// Type-erased module as stored in the registry.
pub trait DispatchTarget: Send + Sync {
    fn module_name(&self) -> &str;

    fn handler_names(&self) -> Vec<String>;

    /// Binds the named handler to the module instance, or `None` if the
    /// module has no such handler.
    fn bind(&self, handler_name: &str) -> Option<BoundHandler>;
}

/// A module instance paired with its handler table.
pub struct MountedModule<M: WorkerModule> {
    module: Arc<M>,
    table: HandlerTable<M>,
}

impl<M: WorkerModule> MountedModule<M> {
    #[must_use]
    pub fn new(module: M) -> Self {
        Self {
            module: Arc::new(module),
            table: M::handlers(),
        }
    }

    #[must_use]
    pub fn module(&self) -> &Arc<M> {
        &self.module
    }
}

impl<M: WorkerModule> DispatchTarget for MountedModule<M> {
    fn module_name(&self) -> &str {
        self.module.module_name()
    }

    fn handler_names(&self) -> Vec<String> {
        self.table.handler_names()
    }

    fn bind(&self, handler_name: &str) -> Option<BoundHandler> {
        let handler = Arc::clone(self.table.get(handler_name)?);
        let module = Arc::clone(&self.module);
        Some(bound_handler(move |data, handle| handler(module, data, handle)))
    }
}
