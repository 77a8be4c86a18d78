//! Host side: the orchestrator callers talk to, and the per-operation
//! contexts it tracks.

pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod stream;

pub use config::OrchestratorConfig;
pub use connector::{InProcessConnector, WorkerConnector};
pub use context::{Completion, ContextSinks, DataSink, ErrorSink, OperationContext, ProgressSink};
pub use error::OperationError;
pub use health::WorkerHealth;
pub use orchestrator::Orchestrator;
pub use stream::{StreamSubscription, StreamingResult};
