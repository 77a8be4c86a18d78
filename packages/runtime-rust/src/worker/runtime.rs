//! The worker's receive loop.
//!
//! `WorkerRuntime` owns the worker endpoint's request receiver. It announces
//! readiness, then spawns one dispatch task per inbound request so requests
//! never serialize behind each other.

use std::sync::Arc;

use offload_core::Request;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;

/// Handle on a running worker loop.
pub struct WorkerRuntime {
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerRuntime {
    /// Spawns the receive loop for `dispatcher`.
    ///
    /// The loop exits when the host endpoint is dropped or [`stop`] is
    /// called; dispatches still running at that point are aborted.
    ///
    /// [`stop`]: WorkerRuntime::stop
    pub fn start(dispatcher: Arc<Dispatcher>, mut requests: mpsc::Receiver<Request>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let loop_dispatcher = Arc::clone(&dispatcher);

        let handle = tokio::spawn(async move {
            let dispatcher = loop_dispatcher;
            if !dispatcher.announce_ready().await {
                error!("host endpoint unreachable, worker not started");
                return;
            }
            info!(modules = ?dispatcher.registry().names(), "worker ready");

            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    request = requests.recv() => {
                        let Some(request) = request else {
                            debug!("request channel closed");
                            break;
                        };
                        let dispatcher = Arc::clone(&dispatcher);
                        tasks.spawn(async move { dispatcher.handle_message(request).await });
                    }
                    Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(err) = finished {
                            error!(error = %err, "dispatch task failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            tasks.shutdown().await;
            info!("worker loop stopped");
        });

        Self {
            dispatcher,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns `true` once the receive loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the loop and waits for it to exit.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use offload_core::messages::INIT_ID;
    use offload_core::{Response, ResponseType};
    use serde_json::{json, Value};

    use super::*;
    use crate::channel::{pair, ChannelConfig, HostEndpoint};
    use crate::worker::config::WorkerConfig;
    use crate::worker::emitter::OperationHandle;
    use crate::worker::module::{HandlerResult, HandlerTable, WorkerModule};

    struct Sleepy;

    impl Sleepy {
        async fn nap(self: Arc<Self>, data: Value, _ctx: OperationHandle) -> HandlerResult {
            let ms = data.as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Value::from(ms))
        }
    }

    impl WorkerModule for Sleepy {
        fn module_name(&self) -> &str {
            "sleepy"
        }

        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new().on("nap", Self::nap)
        }
    }

    fn start() -> (HostEndpoint, WorkerRuntime) {
        let (host, worker) = pair(&ChannelConfig::default());
        let dispatcher = Dispatcher::new(WorkerConfig::default(), worker.responses);
        dispatcher.register_module("sleepy", Sleepy);
        let runtime = WorkerRuntime::start(Arc::new(dispatcher), worker.requests);
        (host, runtime)
    }

    async fn next(host: &mut HostEndpoint) -> Response {
        tokio::time::timeout(Duration::from_secs(2), host.responses.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn announces_init_first() {
        let (mut host, mut runtime) = start();
        let init = next(&mut host).await;
        assert_eq!(init.id, INIT_ID);
        assert_eq!(init.kind, ResponseType::System);
        assert_eq!(init.data["modules"], json!(["sleepy"]));
        runtime.stop().await;
        assert!(runtime.is_finished());
    }

    #[tokio::test]
    async fn slow_request_does_not_block_fast_one() {
        let (mut host, mut runtime) = start();
        let _init = next(&mut host).await;

        host.requests
            .send(Request::new("slow", "sleepy", "nap", json!(200)))
            .await
            .unwrap();
        host.requests
            .send(Request::new("fast", "sleepy", "nap", json!(1)))
            .await
            .unwrap();

        let first = next(&mut host).await;
        assert_eq!(first.id, "fast");
        let second = next(&mut host).await;
        assert_eq!(second.id, "slow");
        runtime.stop().await;
    }

    #[tokio::test]
    async fn loop_exits_when_host_drops() {
        let (host, runtime) = start();
        drop(host);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runtime.is_finished());
    }
}
