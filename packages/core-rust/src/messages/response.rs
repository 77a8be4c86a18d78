//! Response envelope, response type tags, and the error payload.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now_millis, Metadata};

// ---------------------------------------------------------------------------
// ResponseType
// ---------------------------------------------------------------------------

/// Type tag of a response envelope.
///
/// Tags travel as the exact upper-case strings. Anything unrecognised decodes
/// into `Unknown` rather than failing, so receivers can log and drop it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseType {
    Success,
    Error,
    Progress,
    StreamData,
    StreamError,
    System,
    Unknown(String),
}

impl ResponseType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Progress => "PROGRESS",
            Self::StreamData => "STREAM_DATA",
            Self::StreamError => "STREAM_ERROR",
            Self::System => "SYSTEM",
            Self::Unknown(tag) => tag,
        }
    }

    /// SUCCESS and ERROR end an operation; everything else is intermediate.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl From<String> for ResponseType {
    fn from(tag: String) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "SUCCESS" => Self::Success,
            "ERROR" => Self::Error,
            "PROGRESS" => Self::Progress,
            "STREAM_DATA" => Self::StreamData,
            "STREAM_ERROR" => Self::StreamError,
            "SYSTEM" => Self::System,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<ResponseType> for String {
    fn from(kind: ResponseType) -> Self {
        match kind {
            ResponseType::Unknown(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkerError
// ---------------------------------------------------------------------------

/// Error payload carried by ERROR and STREAM_ERROR responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<HashMap<String, Value>>,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack_trace: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: HashMap<String, Value>) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// A response sent from the worker back to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default)]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<WorkerError>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub timestamp: u64,
}

impl Response {
    fn build(id: impl Into<String>, kind: ResponseType, data: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            data,
            error: None,
            metadata: Metadata::new(),
            timestamp: now_millis(),
        }
    }

    pub fn success(id: impl Into<String>, data: Value) -> Self {
        Self::build(id, ResponseType::Success, data)
    }

    pub fn error(id: impl Into<String>, error: WorkerError) -> Self {
        let mut response = Self::build(id, ResponseType::Error, Value::Null);
        response.error = Some(error);
        response
    }

    pub fn progress(id: impl Into<String>, percent: u8) -> Self {
        Self::build(id, ResponseType::Progress, Value::from(percent))
    }

    pub fn stream_data(id: impl Into<String>, data: Value) -> Self {
        Self::build(id, ResponseType::StreamData, data)
    }

    pub fn stream_error(id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut response = Self::build(id, ResponseType::StreamError, Value::Null);
        response.error = Some(WorkerError::new(message));
        response
    }

    pub fn system(id: impl Into<String>, data: Value) -> Self {
        Self::build(id, ResponseType::System, data)
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn type_tags_use_wire_strings() {
        let resp = Response::stream_data("op", json!({"n": 1}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "STREAM_DATA");
        assert!(value.get("error").is_none());

        let resp = Response::error("op", WorkerError::new("boom").with_code("X"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "ERROR");
        assert_eq!(value["error"]["message"], "boom");
        assert_eq!(value["error"]["code"], "X");
    }

    #[test]
    fn unknown_tag_decodes_instead_of_failing() {
        let resp: Response =
            serde_json::from_value(json!({"id": "a", "type": "HEARTBEAT"})).unwrap();
        assert_eq!(resp.kind, ResponseType::Unknown("HEARTBEAT".to_string()));
        assert!(!resp.is_terminal());
    }

    #[test]
    fn lower_case_tags_are_accepted() {
        let resp: Response =
            serde_json::from_value(json!({"id": "a", "type": "success", "data": 1})).unwrap();
        assert_eq!(resp.kind, ResponseType::Success);
    }

    #[test]
    fn only_success_and_error_are_terminal() {
        assert!(ResponseType::Success.is_terminal());
        assert!(ResponseType::Error.is_terminal());
        assert!(!ResponseType::Progress.is_terminal());
        assert!(!ResponseType::StreamData.is_terminal());
        assert!(!ResponseType::StreamError.is_terminal());
        assert!(!ResponseType::System.is_terminal());
    }

    #[test]
    fn stack_trace_uses_camel_case() {
        let err = WorkerError::new("bad").with_stack_trace("at handleGet");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["stackTrace"], "at handleGet");
        assert_eq!(err.to_string(), "bad");
        assert_eq!(err.with_code("E1").to_string(), "[E1] bad");
    }

    #[test]
    fn progress_carries_numeric_payload() {
        let resp = Response::progress("op", 42);
        assert_eq!(resp.data, json!(42));
        assert_eq!(resp.kind.to_string(), "PROGRESS");
    }
}
