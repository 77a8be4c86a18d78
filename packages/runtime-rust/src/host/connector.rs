//! How the orchestrator obtains its host endpoint.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{pair, ChannelConfig, HostEndpoint};
use crate::worker::{Dispatcher, ModuleLoader, WorkerConfig, WorkerRuntime};

/// Establishes the channel to a worker.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    /// Starts (or reaches) a worker and returns the host end of its channel.
    async fn connect(&self, channel: &ChannelConfig) -> anyhow::Result<HostEndpoint>;
}

type Setup = Arc<dyn Fn(&Dispatcher) + Send + Sync>;

/// Runs the worker as a task in the current tokio runtime.
///
/// Every `connect` builds a fresh dispatcher, applies `setup` to register
/// modules, and replaces any worker started by an earlier `connect`.
pub struct InProcessConnector {
    worker: WorkerConfig,
    setup: Setup,
    loader: Option<Arc<dyn ModuleLoader>>,
    runtime: Mutex<Option<WorkerRuntime>>,
}

impl InProcessConnector {
    pub fn new(worker: WorkerConfig, setup: impl Fn(&Dispatcher) + Send + Sync + 'static) -> Self {
        Self {
            worker,
            setup: Arc::new(setup),
            loader: None,
            runtime: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Dispatcher of the currently running worker, if any.
    #[must_use]
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.runtime
            .lock()
            .as_ref()
            .map(|runtime| Arc::clone(runtime.dispatcher()))
    }
}

#[async_trait]
impl WorkerConnector for InProcessConnector {
    async fn connect(&self, channel: &ChannelConfig) -> anyhow::Result<HostEndpoint> {
        let (host, worker) = pair(channel);
        let mut dispatcher = Dispatcher::new(self.worker.clone(), worker.responses);
        if let Some(loader) = &self.loader {
            dispatcher = dispatcher.with_loader(Arc::clone(loader));
        }
        (self.setup)(&dispatcher);

        let runtime = WorkerRuntime::start(Arc::new(dispatcher), worker.requests);
        tracing::debug!("in-process worker started");
        // Replacing drops (and aborts) the previous worker loop.
        *self.runtime.lock() = Some(runtime);
        Ok(host)
    }
}

impl fmt::Debug for InProcessConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessConnector")
            .field("worker", &self.worker)
            .field("loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}
