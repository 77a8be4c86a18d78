use std::collections::HashMap;

use offload_core::{codes, WorkerError};
use serde_json::Value;

use crate::channel::SendError;

/// Failure observed by a caller of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The worker answered with an ERROR envelope.
    #[error("{message}")]
    Remote {
        message: String,
        code: Option<String>,
        details: Option<HashMap<String, Value>>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation id '{id}' is already pending")]
    Collision { id: String },

    #[error("orchestrator has been disposed")]
    Disposed,

    #[error("worker initialization failed: {0}")]
    Initialization(String),

    #[error("worker channel closed")]
    ChannelClosed,

    /// The request could not be queued because the worker is not keeping up.
    #[error("request not sent: {0}")]
    Send(SendError),

    #[error("failed to deserialize result: {0}")]
    Deserialize(#[from] serde_json::Error),
}

impl OperationError {
    /// Error code for this failure; remote errors carry the worker's code.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Remote { code, .. } => code.as_deref(),
            Self::Cancelled => Some(codes::CANCELLED),
            Self::Collision { .. } => Some(codes::OPERATION_ID_COLLISION),
            Self::Disposed => Some(codes::DISPOSED),
            Self::Initialization(_) => Some(codes::INITIALIZATION_FAILED),
            Self::ChannelClosed => Some(codes::CHANNEL_CLOSED),
            Self::Send(_) => Some(codes::OVERLOADED),
            Self::Deserialize(_) => Some(codes::DESERIALIZATION_FAILED),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<SendError> for OperationError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Disconnected => Self::ChannelClosed,
            other => Self::Send(other),
        }
    }
}

impl From<WorkerError> for OperationError {
    fn from(err: WorkerError) -> Self {
        Self::Remote {
            message: err.message,
            code: err.code,
            details: err.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_keeps_worker_code() {
        let err: OperationError = WorkerError::new("Module 'nope' not found")
            .with_code(codes::UNKNOWN_MODULE)
            .into();
        assert_eq!(err.code(), Some(codes::UNKNOWN_MODULE));
        assert_eq!(err.to_string(), "Module 'nope' not found");
    }

    #[test]
    fn local_errors_map_to_codes() {
        assert_eq!(OperationError::Cancelled.code(), Some(codes::CANCELLED));
        assert!(OperationError::Cancelled.is_cancelled());
        let collision = OperationError::Collision {
            id: "op-1".to_string(),
        };
        assert_eq!(collision.code(), Some(codes::OPERATION_ID_COLLISION));
        assert_eq!(collision.to_string(), "operation id 'op-1' is already pending");
    }

    #[test]
    fn send_failures_split_on_disconnect() {
        assert!(matches!(
            OperationError::from(SendError::Disconnected),
            OperationError::ChannelClosed
        ));
        let timeout = OperationError::from(SendError::Timeout);
        assert_eq!(timeout.code(), Some(codes::OVERLOADED));
    }
}
