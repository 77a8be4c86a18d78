//! Envelope shapes exchanged between the host and the worker.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so the same values can
//! travel as structured objects over an in-process channel or as named
//! `MsgPack` through [`crate::codec`].

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

pub mod request;
pub mod response;
pub mod system;

pub use request::{metadata_keys, module_names, OperationRequest, Request};
pub use response::{Response, ResponseType, WorkerError};
pub use system::{
    system_ops, HealthMetrics, HealthReport, InitAnnouncement, ModuleInfo, ModuleListing,
    RegisterModuleAck, RegisterModulePayload, INIT_ID, SYSTEM_MODULE,
};

/// Cross-cutting directives attached to an envelope.
pub type Metadata = HashMap<String, Value>;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
