//! Error codes surfaced to callers in `WorkerError::code`.
//!
//! Module-specific codes (e.g. `HTTP_404`) pass through untouched; the
//! constants here are the ones the orchestration layer itself produces.

pub const UNKNOWN_MODULE: &str = "UNKNOWN_MODULE";
pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
pub const UNKNOWN_SYSTEM_OPERATION: &str = "UNKNOWN_SYSTEM_OPERATION";
pub const MISSING_OPERATION_ID: &str = "MISSING_OPERATION_ID";
pub const OPERATION_ID_COLLISION: &str = "OPERATION_ID_COLLISION";
pub const CANCELLED: &str = "CANCELLED";
pub const HANDLER_PANICKED: &str = "HANDLER_PANICKED";
pub const TIMEOUT: &str = "TIMEOUT";
pub const OVERLOADED: &str = "OVERLOADED";
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
pub const MODULE_REGISTRATION_FAILED: &str = "MODULE_REGISTRATION_FAILED";
pub const RETRY_EXHAUSTED: &str = "RETRY_EXHAUSTED";
pub const WORKER_UNAVAILABLE: &str = "WORKER_UNAVAILABLE";
pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";
pub const DISPOSED: &str = "DISPOSED";
pub const INITIALIZATION_FAILED: &str = "INITIALIZATION_FAILED";
pub const DESERIALIZATION_FAILED: &str = "DESERIALIZATION_FAILED";

/// Placeholder id used when an error cannot be correlated to a request.
pub const UNKNOWN_ID: &str = "unknown";
