//! Outbound response emission for the worker side.
//!
//! `ResponseEmitter` is the dispatcher's handle on the response channel.
//! `OperationHandle` scopes it to one operation id and is what handlers
//! receive for reporting progress and streaming events.

use std::sync::Arc;

use offload_core::messages::Metadata;
use offload_core::Response;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::channel::ChannelSender;

// ---------------------------------------------------------------------------
// ResponseEmitter
// ---------------------------------------------------------------------------

/// Sends response envelopes to the host.
#[derive(Debug, Clone)]
pub struct ResponseEmitter {
    sender: ChannelSender<Response>,
}

impl ResponseEmitter {
    #[must_use]
    pub fn new(sender: ChannelSender<Response>) -> Self {
        Self { sender }
    }

    /// Sends one envelope. Returns `false` if the host could not be reached;
    /// the failure is logged, never raised.
    pub async fn emit(&self, response: Response) -> bool {
        let id = response.id.clone();
        let kind = response.kind.clone();
        match self.sender.send(response).await {
            Ok(()) => true,
            Err(err) => {
                warn!(operation_id = %id, kind = %kind, error = %err, "dropping response");
                false
            }
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }
}

// ---------------------------------------------------------------------------
// OperationHandle
// ---------------------------------------------------------------------------

/// Per-operation view handed to a module handler.
///
/// Cloning is cheap; streaming handlers move a clone into the task that keeps
/// producing events after the handler has returned its terminal value.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: Arc<str>,
    metadata: Arc<Metadata>,
    emitter: ResponseEmitter,
    cancellation: CancellationToken,
}

impl OperationHandle {
    #[must_use]
    pub fn new(
        id: impl Into<Arc<str>>,
        metadata: Metadata,
        emitter: ResponseEmitter,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            metadata: Arc::new(metadata),
            emitter,
            cancellation,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn emitter(&self) -> &ResponseEmitter {
        &self.emitter
    }

    /// Fires when the worker is shutting down.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Reports progress on a 0..=100 scale; larger values are clamped.
    pub async fn progress(&self, percent: u8) -> bool {
        self.emitter
            .emit(Response::progress(self.id.as_ref(), percent.min(100)))
            .await
    }

    pub async fn stream_data(&self, data: Value) -> bool {
        self.emitter
            .emit(Response::stream_data(self.id.as_ref(), data))
            .await
    }

    pub async fn stream_error(&self, message: impl Into<String>) -> bool {
        self.emitter
            .emit(Response::stream_error(self.id.as_ref(), message))
            .await
    }
}
