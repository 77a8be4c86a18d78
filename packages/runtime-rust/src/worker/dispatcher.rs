//! Worker-side request dispatch.
//!
//! [`Dispatcher::handle_message`] is the single entry point for inbound
//! request envelopes. Every non-system request ends with exactly one terminal
//! response, whether the module is unknown, the handler is missing, the
//! handler fails, panics, or times out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use offload_core::messages::{metadata_keys, HealthMetrics, InitAnnouncement, INIT_ID};
use offload_core::{codes, HealthReport, Request, Response, WorkerError, SYSTEM_MODULE};
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt;
use tracing::{debug, warn};

use super::config::WorkerConfig;
use super::emitter::{OperationHandle, ResponseEmitter};
use super::lifecycle::Lifecycle;
use super::middleware::{build_invocation_pipeline, Invocation, InvocationPipeline};
use super::module::{handler_name, DispatchTarget, MountedModule, WorkerModule};
use super::registry::ModuleRegistry;
use super::system::{self, ModuleLoader};
use crate::channel::ChannelSender;

/// Bookkeeping for a handler that is currently running.
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub module: String,
    pub operation: String,
    pub started_at: Instant,
    seq: u64,
}

/// Removes an active-operation entry when the invocation ends, however it ends.
struct ActiveGuard<'a> {
    active: &'a DashMap<String, ActiveOperation>,
    id: String,
    seq: u64,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        // Ids are opaque to the worker; only remove the entry this guard added.
        self.active.remove_if(&self.id, |_, op| op.seq == self.seq);
    }
}

/// Routes requests to registered modules and emits their responses.
pub struct Dispatcher {
    config: WorkerConfig,
    registry: ModuleRegistry,
    emitter: ResponseEmitter,
    pipeline: Mutex<InvocationPipeline>,
    active: DashMap<String, ActiveOperation>,
    lifecycle: Lifecycle,
    loader: Option<Arc<dyn ModuleLoader>>,
    next_seq: AtomicU64,
    completed: AtomicU64,
    started_at: Instant,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: WorkerConfig, responses: ChannelSender<Response>) -> Self {
        let pipeline = build_invocation_pipeline(&config);
        Self {
            config,
            registry: ModuleRegistry::new(),
            emitter: ResponseEmitter::new(responses),
            pipeline: Mutex::new(pipeline),
            active: DashMap::new(),
            lifecycle: Lifecycle::new(),
            loader: None,
            next_seq: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Enables the `registerModule` system operation.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Registers `module` under `name`, replacing any module of that name.
    pub fn register_module<M: WorkerModule>(&self, name: impl Into<String>, module: M) {
        self.register_target(name, Arc::new(MountedModule::new(module)));
    }

    pub fn register_target(&self, name: impl Into<String>, target: Arc<dyn DispatchTarget>) {
        let name = name.into();
        if self.registry.register(name.clone(), target) {
            debug!(module = %name, "replaced module");
        } else {
            debug!(module = %name, "registered module");
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub(crate) fn loader(&self) -> Option<&Arc<dyn ModuleLoader>> {
        self.loader.as_ref()
    }

    /// Number of handlers currently running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn active_operations(&self) -> Vec<(String, ActiveOperation)> {
        self.active
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            is_healthy: self.lifecycle.is_accepting(),
            active_operations: self.active.len(),
            registered_modules: self.registry.names(),
            metrics: HealthMetrics {
                total_operations: self.completed.load(Ordering::Relaxed),
                uptime_ms: u64::try_from(self.started_at.elapsed().as_millis())
                    .unwrap_or(u64::MAX),
            },
        }
    }

    /// Marks the worker ready and emits the readiness announcement.
    pub async fn announce_ready(&self) -> bool {
        self.lifecycle.set_ready();
        let announcement = InitAnnouncement {
            status: "initialized".to_string(),
            modules: self.registry.names(),
        };
        let data = serde_json::to_value(&announcement).unwrap_or(Value::Null);
        self.emitter.emit(Response::system(INIT_ID, data)).await
    }

    /// Handles one inbound request envelope.
    pub async fn handle_message(&self, request: Request) {
        if request.module == SYSTEM_MODULE {
            let response = system::handle(self, &request).await;
            self.emitter.emit(response).await;
            return;
        }

        if request.id.is_empty() {
            warn!(module = %request.module, operation = %request.operation, "request without id");
            let err = WorkerError::new("Request must have an operation id")
                .with_code(codes::MISSING_OPERATION_ID);
            self.emitter.emit(Response::error(codes::UNKNOWN_ID, err)).await;
            return;
        }

        let (Ok(response) | Err(response)) = self.invoke(request).await;
        self.emitter.emit(response).await;
    }

    /// Resolves and runs the handler. `Err` carries a protocol-level
    /// rejection produced before any handler ran.
    async fn invoke(&self, request: Request) -> Result<Response, Response> {
        let Request {
            id,
            module,
            operation,
            data,
            metadata,
            ..
        } = request;

        if !self.lifecycle.is_accepting() {
            let err = WorkerError::new(format!("Worker is {}", self.lifecycle.state()))
                .with_code(codes::WORKER_UNAVAILABLE);
            return Err(Response::error(id, err));
        }

        let Some(target) = self.registry.get(&module) else {
            return Err(Response::error(id, self.unknown_module(&module)));
        };

        let name = handler_name(&operation);
        let Some(handler) = target.bind(&name) else {
            let mut details = HashMap::new();
            details.insert("handler".to_string(), Value::from(name));
            details.insert(
                "availableHandlers".to_string(),
                Value::from(target.handler_names()),
            );
            let err = WorkerError::new(format!(
                "Operation '{operation}' not supported by module '{module}'"
            ))
            .with_code(codes::UNKNOWN_OPERATION)
            .with_details(details);
            return Err(Response::error(id, err));
        };

        let timeout_ms = metadata
            .get(metadata_keys::TIMEOUT)
            .and_then(Value::as_u64)
            .unwrap_or(self.config.default_operation_timeout_ms);

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.active.insert(
            id.clone(),
            ActiveOperation {
                module: module.clone(),
                operation: operation.clone(),
                started_at: Instant::now(),
                seq,
            },
        );
        let active_guard = ActiveGuard {
            active: &self.active,
            id: id.clone(),
            seq,
        };
        let _in_flight = self.lifecycle.in_flight_guard();

        let handle = OperationHandle::new(
            id.as_str(),
            metadata,
            self.emitter.clone(),
            self.lifecycle.shutdown_token().child_token(),
        );
        let invocation = Invocation {
            module,
            operation,
            data,
            handle,
            handler,
            timeout_ms,
        };

        let pipeline = self.pipeline.lock().clone();
        let result = pipeline.oneshot(invocation).await;

        drop(active_guard);
        self.completed.fetch_add(1, Ordering::Relaxed);

        Ok(match result {
            Ok(value) => Response::success(id, value),
            Err(err) => Response::error(id, err.into_worker_error()),
        })
    }

    fn unknown_module(&self, module: &str) -> WorkerError {
        let available = self.registry.names();
        let mut details = HashMap::new();
        details.insert(
            "availableModules".to_string(),
            Value::from(available.clone()),
        );
        WorkerError::new(format!(
            "Module '{module}' not found. Available modules: {}",
            available.join(", ")
        ))
        .with_code(codes::UNKNOWN_MODULE)
        .with_details(details)
    }
}
