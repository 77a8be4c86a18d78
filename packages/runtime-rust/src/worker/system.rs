//! Handlers for requests addressed to the reserved `SYSTEM` module.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use offload_core::messages::{
    system_ops, ModuleListing, RegisterModuleAck, RegisterModulePayload,
};
use offload_core::{codes, Request, Response, WorkerError};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::dispatcher::Dispatcher;
use super::module::DispatchTarget;

// ---------------------------------------------------------------------------
// ModuleLoader
// ---------------------------------------------------------------------------

/// Side-loads module code for the `registerModule` system operation.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Loads the module found at `script_path`.
    async fn load(
        &self,
        module_name: &str,
        script_path: &str,
    ) -> anyhow::Result<Arc<dyn DispatchTarget>>;
}

type ModuleFactory = Arc<dyn Fn() -> Arc<dyn DispatchTarget> + Send + Sync>;

/// Loader backed by a fixed catalogue of module factories keyed by path.
#[derive(Default)]
pub struct StaticModuleLoader {
    catalogue: HashMap<String, ModuleFactory>,
}

impl StaticModuleLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module<F>(mut self, script_path: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn DispatchTarget> + Send + Sync + 'static,
    {
        self.catalogue.insert(script_path.into(), Arc::new(factory));
        self
    }
}

#[async_trait]
impl ModuleLoader for StaticModuleLoader {
    async fn load(
        &self,
        _module_name: &str,
        script_path: &str,
    ) -> anyhow::Result<Arc<dyn DispatchTarget>> {
        let factory = self
            .catalogue
            .get(script_path)
            .ok_or_else(|| anyhow::anyhow!("no module available at '{script_path}'"))?;
        Ok(factory())
    }
}

// ---------------------------------------------------------------------------
// System dispatch
// ---------------------------------------------------------------------------

fn reply<T: Serialize>(id: &str, payload: &T) -> Response {
    match serde_json::to_value(payload) {
        Ok(data) => Response::success(id, data),
        Err(err) => Response::error(id, WorkerError::new(err.to_string())),
    }
}

/// Produces the single response for a system request.
pub(crate) async fn handle(dispatcher: &Dispatcher, request: &Request) -> Response {
    match request.operation.as_str() {
        system_ops::GET_HEALTH => reply(&request.id, &dispatcher.health_report()),
        system_ops::LIST_MODULES => reply(
            &request.id,
            &ModuleListing {
                modules: dispatcher.registry().listing(),
            },
        ),
        system_ops::REGISTER_MODULE => register_module(dispatcher, request).await,
        system_ops::DISPOSE => dispose(dispatcher, &request.id).await,
        other => Response::error(
            &request.id,
            WorkerError::new(format!("Unknown system operation: {other}"))
                .with_code(codes::UNKNOWN_SYSTEM_OPERATION),
        ),
    }
}

async fn register_module(dispatcher: &Dispatcher, request: &Request) -> Response {
    let payload: RegisterModulePayload = match serde_json::from_value(request.data.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            return Response::error(
                &request.id,
                WorkerError::new(format!("Failed to register module: {err}"))
                    .with_code(codes::INVALID_PAYLOAD),
            );
        }
    };

    let Some(loader) = dispatcher.loader() else {
        return Response::error(
            &request.id,
            WorkerError::new("Failed to register module: no module loader configured")
                .with_code(codes::MODULE_REGISTRATION_FAILED),
        );
    };

    match loader
        .load(&payload.module_name, &payload.script_path)
        .await
    {
        Ok(target) => {
            dispatcher.register_target(payload.module_name.clone(), target);
            info!(module = %payload.module_name, path = %payload.script_path, "module side-loaded");
            reply(
                &request.id,
                &RegisterModuleAck {
                    registered: payload.module_name,
                },
            )
        }
        Err(err) => {
            warn!(module = %payload.module_name, error = %err, "module registration failed");
            Response::error(
                &request.id,
                WorkerError::new(format!("Failed to register module: {err:#}"))
                    .with_code(codes::MODULE_REGISTRATION_FAILED),
            )
        }
    }
}

async fn dispose(dispatcher: &Dispatcher, id: &str) -> Response {
    let lifecycle = dispatcher.lifecycle();
    lifecycle.begin_drain();
    let drained = lifecycle
        .wait_for_drain(dispatcher.config().drain_timeout())
        .await;
    if drained {
        info!("worker drained");
    } else {
        warn!(
            in_flight = lifecycle.in_flight_count(),
            "drain timed out with handlers still running"
        );
    }
    Response::success(
        id,
        serde_json::json!({ "drained": drained, "state": lifecycle.state().as_str() }),
    )
}
