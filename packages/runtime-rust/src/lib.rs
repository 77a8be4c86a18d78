//! `Offload` Runtime: runs named operations of capability modules on a
//! background worker and correlates their responses back to callers.
//!
//! The [`host`] side owns the [`Orchestrator`], which issues requests over a
//! [`channel`] and tracks each pending call until its terminal response. The
//! [`worker`] side owns the [`Dispatcher`], which routes requests to
//! registered [`WorkerModule`]s through a tower middleware pipeline.

pub mod channel;
pub mod host;
pub mod worker;

pub use host::{
    InProcessConnector, OperationError, Orchestrator, OrchestratorConfig, StreamSubscription,
    StreamingResult, WorkerConnector, WorkerHealth,
};
pub use offload_core::{OperationRequest, Request, Response, ResponseType, WorkerError};
pub use worker::{
    Dispatcher, HandlerResult, HandlerTable, ModuleError, OperationHandle, WorkerConfig,
    WorkerModule, WorkerRuntime,
};
