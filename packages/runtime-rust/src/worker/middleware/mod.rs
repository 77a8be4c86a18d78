//! Tower middleware wrapped around every module handler invocation.
//!
//! Layer order (outermost to innermost): load shedding, timeout, metrics,
//! then [`HandlerService`], which runs the bound handler in its own task.

pub mod handler;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use handler::HandlerService;
pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_invocation_pipeline, InvocationPipeline};
pub use timeout::TimeoutLayer;

use std::fmt;

use offload_core::{codes, WorkerError};
use serde_json::Value;

use super::emitter::OperationHandle;
use super::module::{BoundHandler, ModuleError};

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// One resolved handler call travelling through the pipeline.
pub struct Invocation {
    pub module: String,
    pub operation: String,
    pub data: Value,
    pub handle: OperationHandle,
    pub handler: BoundHandler,
    /// Deadline for the handler's terminal value, in milliseconds.
    pub timeout_ms: u64,
}

impl Invocation {
    #[must_use]
    pub fn id(&self) -> &str {
        self.handle.id()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.handle.id())
            .field("module", &self.module)
            .field("operation", &self.operation)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// InvocationError
// ---------------------------------------------------------------------------

/// Why an invocation did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("worker overloaded, try again later")]
    Overloaded,

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler task was aborted")]
    Aborted,
}

impl InvocationError {
    /// Converts into the error payload of a terminal ERROR response.
    #[must_use]
    pub fn into_worker_error(self) -> WorkerError {
        match self {
            Self::Module(err) => err.into_worker_error(),
            Self::Timeout { .. } => WorkerError::new(self.to_string()).with_code(codes::TIMEOUT),
            Self::Overloaded => WorkerError::new(self.to_string()).with_code(codes::OVERLOADED),
            Self::Panicked(ref payload) => WorkerError::new(payload.clone())
                .with_code(codes::HANDLER_PANICKED)
                .with_stack_trace(self.to_string()),
            Self::Aborted => WorkerError::new(self.to_string()).with_code(codes::CANCELLED),
        }
    }
}
