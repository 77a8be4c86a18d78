//! Request envelope and the caller-facing request builder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now_millis, Metadata};

// ---------------------------------------------------------------------------
// Metadata keys
// ---------------------------------------------------------------------------

/// Well-known keys carried in request `metadata`.
pub mod metadata_keys {
    pub const AUTH_TOKEN: &str = "authToken";
    pub const MAX_RETRIES: &str = "maxRetries";
    /// Per-operation timeout in milliseconds.
    pub const TIMEOUT: &str = "timeout";
}

/// Names of the capability modules the host knows how to address directly.
pub mod module_names {
    pub const HTTP: &str = "http";
    pub const WEBSOCKET: &str = "websocket";
    pub const BACKGROUND: &str = "background";
    pub const REALTIME: &str = "realtime";
}

// ---------------------------------------------------------------------------
// Request envelope
// ---------------------------------------------------------------------------

/// A request sent from the host to the worker.
///
/// `id` is optional on the wire so that a malformed request can still be
/// decoded and answered with a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub id: String,
    pub module: String,
    pub operation: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub timestamp: u64,
}

impl Request {
    /// Builds a request envelope stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        module: impl Into<String>,
        operation: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: id.into(),
            module: module.into(),
            operation: operation.into(),
            data,
            metadata: Metadata::new(),
            timestamp: now_millis(),
        }
    }

    /// Reads an unsigned integer metadata directive (e.g. `timeout`).
    #[must_use]
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }
}

// ---------------------------------------------------------------------------
// OperationRequest builder
// ---------------------------------------------------------------------------

/// What a caller asks the host orchestrator to run.
///
/// The operation id is optional: when absent the orchestrator generates one.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub module: String,
    pub operation: String,
    pub data: Value,
    pub metadata: Metadata,
    pub operation_id: Option<String>,
}

impl OperationRequest {
    pub fn new(module: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            operation: operation.into(),
            data: Value::Null,
            metadata: Metadata::new(),
            operation_id: None,
        }
    }

    pub fn http(operation: impl Into<String>, data: Value) -> Self {
        Self::new(module_names::HTTP, operation).with_data(data)
    }

    pub fn websocket(operation: impl Into<String>, data: Value) -> Self {
        Self::new(module_names::WEBSOCKET, operation).with_data(data)
    }

    pub fn background(operation: impl Into<String>, data: Value) -> Self {
        Self::new(module_names::BACKGROUND, operation).with_data(data)
    }

    pub fn realtime(operation: impl Into<String>, data: Value) -> Self {
        Self::new(module_names::REALTIME, operation).with_data(data)
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Pins the operation id instead of letting the orchestrator generate one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_auth(self, token: impl Into<String>) -> Self {
        self.with_metadata(metadata_keys::AUTH_TOKEN, token.into())
    }

    #[must_use]
    pub fn with_retry(self, max_retries: u32) -> Self {
        self.with_metadata(metadata_keys::MAX_RETRIES, max_retries)
    }

    #[must_use]
    pub fn with_timeout(self, timeout_ms: u64) -> Self {
        self.with_metadata(metadata_keys::TIMEOUT, timeout_ms)
    }

    /// Seals the request into a wire envelope under the given id.
    #[must_use]
    pub fn into_envelope(self, id: String) -> Request {
        Request {
            id,
            module: self.module,
            operation: self.operation,
            data: self.data,
            metadata: self.metadata,
            timestamp: now_millis(),
        }
    }
}
