//! Host-side bookkeeping for one in-flight operation.
//!
//! A context owns the operation's cancellation token, a single-resolution
//! completion slot, and the sinks supplied when the call was issued. The slot
//! is settled at most once: the first of `resolve`, `reject`, `cancel` or
//! `dispose` wins and later calls are no-ops.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use offload_core::WorkerError;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::error::OperationError;
use super::stream::DeliveryGate;

pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;
pub type DataSink = Arc<dyn Fn(Value) + Send + Sync>;
pub type ErrorSink = Arc<dyn Fn(WorkerError) + Send + Sync>;

/// Receives the settled outcome of a context.
pub type Completion = oneshot::Receiver<Result<Value, OperationError>>;

// ---------------------------------------------------------------------------
// ContextSinks
// ---------------------------------------------------------------------------

/// Optional callbacks fixed at context creation.
#[derive(Clone, Default)]
pub struct ContextSinks {
    pub on_progress: Option<ProgressSink>,
    pub on_data: Option<DataSink>,
    pub on_error: Option<ErrorSink>,
}

impl ContextSinks {
    #[must_use]
    pub fn progress(mut self, sink: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(sink));
        self
    }

    #[must_use]
    pub fn data(mut self, sink: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(sink));
        self
    }

    #[must_use]
    pub fn error(mut self, sink: impl Fn(WorkerError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(sink));
        self
    }
}

impl fmt::Debug for ContextSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSinks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_data", &self.on_data.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// OperationContext
// ---------------------------------------------------------------------------

pub struct OperationContext {
    id: String,
    token: CancellationToken,
    slot: Mutex<Option<oneshot::Sender<Result<Value, OperationError>>>>,
    sinks: ContextSinks,
    /// Set for streaming calls; cancels the stream that outlives the context.
    stream_token: Option<CancellationToken>,
    stream_gate: DeliveryGate,
    disposed: AtomicBool,
}

impl OperationContext {
    /// Creates a context whose token is a child of `external` when given, so
    /// cancelling the caller's token cancels the context but not the other
    /// way round.
    #[must_use]
    pub fn create(
        id: impl Into<String>,
        external: Option<&CancellationToken>,
        sinks: ContextSinks,
    ) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let token = external.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let ctx = Self {
            id: id.into(),
            token,
            slot: Mutex::new(Some(tx)),
            sinks,
            stream_token: None,
            stream_gate: DeliveryGate::default(),
            disposed: AtomicBool::new(false),
        };
        (ctx, rx)
    }

    /// Marks the context as streaming. `stream_token` governs the stream
    /// events that keep flowing after the terminal SUCCESS.
    #[must_use]
    pub fn streaming(mut self, stream_token: CancellationToken) -> Self {
        self.stream_token = Some(stream_token);
        self
    }

    /// Shares `gate` with the subscription that will own the stream.
    #[must_use]
    pub(crate) fn with_stream_gate(mut self, gate: DeliveryGate) -> Self {
        self.stream_gate = gate;
        self
    }

    pub(crate) fn stream_gate(&self) -> &DeliveryGate {
        &self.stream_gate
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.stream_token.is_some()
    }

    #[must_use]
    pub fn stream_token(&self) -> Option<&CancellationToken> {
        self.stream_token.as_ref()
    }

    #[must_use]
    pub fn sinks(&self) -> &ContextSinks {
        &self.sinks
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the context's token is cancelled, by either side.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    fn settle(&self, outcome: Result<Value, OperationError>) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        // The awaiting caller may already be gone; the slot is settled either way.
        let _ = tx.send(outcome);
        true
    }

    /// Returns `false` if the context was already settled.
    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: OperationError) -> bool {
        self.settle(Err(error))
    }

    /// Fires the token and rejects with `Cancelled` if still pending.
    pub fn cancel(&self) -> bool {
        self.token.cancel();
        self.settle(Err(OperationError::Cancelled))
    }

    /// Forwards to the progress sink while pending; a no-op otherwise.
    pub fn report_progress(&self, percent: u8) {
        if self.is_settled() || self.is_disposed() {
            return;
        }
        if let Some(sink) = &self.sinks.on_progress {
            sink(percent.min(100));
        }
    }

    fn stream_open(&self) -> bool {
        self.is_streaming() && !self.token.is_cancelled() && !self.is_disposed()
    }

    /// Delivers a STREAM_DATA payload. Returns `false` if it was dropped.
    pub fn emit_data(&self, data: Value) -> bool {
        let Some(sink) = &self.sinks.on_data else {
            return false;
        };
        self.stream_gate.run(|| {
            if self.stream_open() {
                sink(data);
                true
            } else {
                false
            }
        })
    }

    /// Delivers a STREAM_ERROR payload. Returns `false` if it was dropped.
    pub fn emit_error(&self, error: WorkerError) -> bool {
        let Some(sink) = &self.sinks.on_error else {
            return false;
        };
        self.stream_gate.run(|| {
            if self.stream_open() {
                sink(error);
                true
            } else {
                false
            }
        })
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Releases the context's token and silences its sinks. Idempotent.
    ///
    /// A context that is still pending is cancelled first so its caller never
    /// hangs.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.settle(Err(OperationError::Cancelled));
        self.token.cancel();
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("id", &self.id)
            .field("streaming", &self.is_streaming())
            .field("settled", &self.is_settled())
            .field("cancelled", &self.is_cancelled())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn first_settlement_wins() {
        let (ctx, completion) = OperationContext::create("op-1", None, ContextSinks::default());
        assert!(ctx.resolve(json!(1)));
        assert!(!ctx.resolve(json!(2)));
        assert!(!ctx.reject(OperationError::Disposed));
        assert!(!ctx.cancel());

        assert_eq!(completion.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn cancel_rejects_pending_context() {
        let (ctx, completion) = OperationContext::create("op-2", None, ContextSinks::default());
        assert!(ctx.cancel());
        assert!(ctx.is_cancelled());
        assert!(completion.await.unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn external_token_cancels_context_but_not_reverse() {
        let caller = CancellationToken::new();
        let (ctx, _completion) =
            OperationContext::create("op-3", Some(&caller), ContextSinks::default());
        ctx.cancel();
        assert!(!caller.is_cancelled());

        let (other, _completion) =
            OperationContext::create("op-4", Some(&caller), ContextSinks::default());
        caller.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn progress_only_while_pending() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let sinks = ContextSinks::default().progress(move |pct| log.lock().push(pct));
        let (ctx, _completion) = OperationContext::create("op-5", None, sinks);

        ctx.report_progress(10);
        ctx.report_progress(180);
        ctx.resolve(Value::Null);
        ctx.report_progress(90);

        assert_eq!(*seen.lock(), vec![10, 100]);
    }

    #[test]
    fn progress_without_sink_is_ignored() {
        let (ctx, _completion) = OperationContext::create("op-6", None, ContextSinks::default());
        ctx.report_progress(50);
        assert!(!ctx.is_settled());
    }

    #[test]
    fn stream_sinks_require_streaming_and_stop_on_cancel() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let sinks = ContextSinks::default().data(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (plain, _c) = OperationContext::create("op-7", None, sinks.clone());
        assert!(!plain.emit_data(json!("x")));

        let (ctx, _c) = OperationContext::create("op-8", None, sinks);
        let ctx = ctx.streaming(CancellationToken::new());
        assert!(ctx.emit_data(json!("a")));
        ctx.cancel();
        assert!(!ctx.emit_data(json!("b")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_unblocks_caller() {
        let (ctx, completion) = OperationContext::create("op-9", None, ContextSinks::default());
        ctx.dispose();
        ctx.dispose();
        assert!(ctx.is_disposed());
        assert!(ctx.is_cancelled());
        assert!(completion.await.unwrap().unwrap_err().is_cancelled());
    }

    proptest! {
        #[test]
        fn exactly_one_outcome_for_any_settlement_sequence(ops in proptest::collection::vec(0u8..4, 1..12)) {
            let (ctx, mut completion) =
                OperationContext::create("prop", None, ContextSinks::default());
            let mut wins = 0;
            for (i, op) in ops.iter().enumerate() {
                let won = match op {
                    0 => ctx.resolve(json!(i)),
                    1 => ctx.reject(OperationError::ChannelClosed),
                    2 => ctx.cancel(),
                    _ => { ctx.dispose(); false }
                };
                if won { wins += 1; }
            }
            prop_assert!(wins <= 1);
            prop_assert!(ctx.is_settled());
            prop_assert!(completion.try_recv().is_ok());
        }
    }
}
