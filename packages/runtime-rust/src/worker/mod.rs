//! Worker side: module contract, dispatcher, and the receive loop.

pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod lifecycle;
pub mod middleware;
pub mod module;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod shared;
pub mod system;

pub use config::WorkerConfig;
pub use dispatcher::{ActiveOperation, Dispatcher};
pub use emitter::{OperationHandle, ResponseEmitter};
pub use lifecycle::{Lifecycle, WorkerState};
pub use middleware::InvocationError;
pub use module::{
    bound_handler, handler_name, parse_payload, to_payload, BoundHandler, DispatchTarget,
    HandlerFuture, HandlerResult, HandlerTable, ModuleError, MountedModule, WorkerModule,
};
pub use registry::ModuleRegistry;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use runtime::WorkerRuntime;
pub use shared::SharedState;
pub use system::{ModuleLoader, StaticModuleLoader};
