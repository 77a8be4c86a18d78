//! Host orchestrator: issues requests and correlates their responses.
//!
//! Every call registers an [`OperationContext`] in the pending table under
//! its operation id, sends the request envelope, and waits for the context to
//! settle. A single listener task drains the response side of the channel and
//! drives contexts through [`Orchestrator::on_message`].
//!
//! Streaming calls keep their data/error sinks alive after the terminal
//! SUCCESS by moving them into a separate streams table, so the pending entry
//! is still removed on every exit path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use offload_core::messages::{
    system_ops, ModuleInfo, ModuleListing, RegisterModuleAck, RegisterModulePayload,
};
use offload_core::{
    generate_operation_id, HealthReport, OperationRequest, Request, Response, ResponseType,
    WorkerError, SYSTEM_MODULE,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use super::config::OrchestratorConfig;
use super::connector::WorkerConnector;
use super::context::{ContextSinks, DataSink, ErrorSink, OperationContext, ProgressSink};
use super::error::OperationError;
use super::health::WorkerHealth;
use super::stream::{DeliveryGate, StreamEntry, StreamSubscription, StreamingResult};
use crate::channel::{ChannelSender, HostEndpoint};

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Host-side entry point. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    state: Arc<HostState>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, connector: Arc<dyn WorkerConnector>) -> Self {
        let state = Arc::new_cyclic(|me| HostState {
            config,
            connector,
            pending: DashMap::new(),
            streams: DashMap::new(),
            link: RwLock::new(None),
            init_gate: tokio::sync::Mutex::new(InitGate::default()),
            init_attempts: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            me: me.clone(),
        });
        Self { state }
    }

    /// Connects to the worker and waits until it answers a health request.
    ///
    /// Idempotent and single-flight: concurrent callers share one attempt and
    /// all observe its failure. A failed attempt is not cached; the next call
    /// tries again.
    ///
    /// # Errors
    ///
    /// `Initialization` if connecting or the readiness check fails, and
    /// `Disposed` after [`dispose`](Self::dispose).
    pub async fn initialize(&self) -> Result<(), OperationError> {
        self.state.link().await.map(|_| ())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.current_link().is_some()
    }

    /// Runs one operation and deserializes its SUCCESS payload into `T`.
    ///
    /// `on_progress` receives PROGRESS values while the call is pending.
    /// Cancelling `cancellation` settles the call with `Cancelled` at once;
    /// any later response for it is dropped as orphaned.
    ///
    /// # Errors
    ///
    /// `Collision` if the request's explicit id is already pending (nothing
    /// is sent), `Remote` for an ERROR response, `Cancelled` on cancellation
    /// or disposal, and `Deserialize` if the payload does not fit `T`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: OperationRequest,
        on_progress: Option<ProgressSink>,
        cancellation: Option<CancellationToken>,
    ) -> Result<T, OperationError> {
        let link = self.state.link().await?;
        let sinks = ContextSinks {
            on_progress,
            ..ContextSinks::default()
        };
        let (_, value) = self
            .state
            .call(&link, request, sinks, cancellation, None)
            .await?;
        coerce(value)
    }

    /// Runs a streaming operation.
    ///
    /// Resolves with the terminal SUCCESS value (e.g. a subscription id) and
    /// a [`StreamSubscription`]. STREAM_DATA / STREAM_ERROR events for the
    /// operation keep reaching `on_data` / `on_error` until the subscription
    /// is closed, `cancellation` fires, or the orchestrator is disposed.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute); errors after the stream is
    /// established arrive through `on_error` instead.
    pub async fn execute_streaming<T: DeserializeOwned>(
        &self,
        request: OperationRequest,
        on_data: Option<DataSink>,
        on_error: Option<ErrorSink>,
        cancellation: Option<CancellationToken>,
    ) -> Result<StreamingResult<T>, OperationError> {
        let link = self.state.link().await?;
        let stream_token = cancellation
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let gate = DeliveryGate::default();
        let sinks = ContextSinks {
            on_progress: None,
            on_data,
            on_error,
        };

        let stream = (stream_token.clone(), gate.clone());
        let outcome = self
            .state
            .call(&link, request, sinks, cancellation, Some(stream))
            .await
            .and_then(|(id, value)| Ok((id, coerce::<T>(value)?)));

        match outcome {
            Ok((id, value)) => Ok(StreamingResult {
                value,
                subscription: StreamSubscription::new(
                    id,
                    stream_token,
                    gate,
                    self.state.me.clone(),
                ),
            }),
            Err(err) => {
                stream_token.cancel();
                Err(err)
            }
        }
    }

    /// Channel-receive entry point. Never fails; envelopes that cannot be
    /// routed are logged and dropped.
    pub fn on_message(&self, response: Response) {
        self.state.on_message(response);
    }

    /// Asks the worker to side-load a module.
    ///
    /// # Errors
    ///
    /// `Remote` with `MODULE_REGISTRATION_FAILED` if the worker could not load it.
    pub async fn register_module(
        &self,
        module_name: impl Into<String>,
        script_path: impl Into<String>,
    ) -> Result<RegisterModuleAck, OperationError> {
        let payload = RegisterModulePayload {
            module_name: module_name.into(),
            script_path: script_path.into(),
        };
        let request = OperationRequest::new(SYSTEM_MODULE, system_ops::REGISTER_MODULE)
            .with_data(serde_json::to_value(&payload)?);
        self.execute(request, None, None).await
    }

    /// # Errors
    ///
    /// Propagates initialization and channel failures.
    pub async fn list_modules(&self) -> Result<Vec<ModuleInfo>, OperationError> {
        let request = OperationRequest::new(SYSTEM_MODULE, system_ops::LIST_MODULES);
        let listing: ModuleListing = self.execute(request, None, None).await?;
        Ok(listing.modules)
    }

    /// Worker health. Failures produce a degraded summary instead of an error.
    pub async fn get_health(&self) -> WorkerHealth {
        let request = OperationRequest::new(SYSTEM_MODULE, system_ops::GET_HEALTH);
        match self.execute::<HealthReport>(request, None, None).await {
            Ok(report) => report.into(),
            Err(err) => {
                warn!(error = %err, "health check failed");
                WorkerHealth::degraded(err.to_string())
            }
        }
    }

    /// Cancels every pending call, closes every stream, asks the worker to
    /// tear down (best effort), and releases the channel. Idempotent.
    ///
    /// Later calls fail with `Disposed`.
    pub fn dispose(&self) {
        if self.state.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.state.cancel_all(|ctx| ctx.cancel());
        self.state.close_all_streams();

        let link = self.state.link.write().take();
        if let Some(link) = link {
            let teardown = OperationRequest::new(SYSTEM_MODULE, system_ops::DISPOSE)
                .into_envelope(generate_operation_id());
            if let Err(err) = link.requests.try_send(teardown) {
                warn!(error = %err, "remote teardown not delivered");
            }
        }
        info!(cancelled, "orchestrator disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    /// Number of calls awaiting their terminal response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.pending.len()
    }

    /// Number of open streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.state
            .streams
            .iter()
            .filter(|entry| entry.value().is_open())
            .count()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("initialized", &self.is_initialized())
            .field("pending", &self.pending_count())
            .field("streams", &self.stream_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HostState
// ---------------------------------------------------------------------------

/// An established channel plus the task listening on it.
struct Link {
    generation: u64,
    requests: ChannelSender<Request>,
    _listener: AbortOnDropHandle<()>,
}

#[derive(Default)]
struct InitGate {
    attempts: u64,
    last_error: Option<String>,
}

pub(crate) struct HostState {
    config: OrchestratorConfig,
    connector: Arc<dyn WorkerConnector>,
    pending: DashMap<String, Arc<OperationContext>>,
    streams: DashMap<String, StreamEntry>,
    link: RwLock<Option<Arc<Link>>>,
    init_gate: tokio::sync::Mutex<InitGate>,
    /// Mirrors `InitGate::attempts` so waiters can tell whether an attempt
    /// finished while they queued.
    init_attempts: AtomicU64,
    next_seq: AtomicU64,
    disposed: AtomicBool,
    me: Weak<HostState>,
}

/// Removes the pending entry and disposes its context on every exit path.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, Arc<OperationContext>>,
    ctx: Arc<OperationContext>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .remove_if(self.ctx.id(), |_, current| Arc::ptr_eq(current, &self.ctx));
        self.ctx.dispose();
    }
}

impl HostState {
    fn current_link(&self) -> Option<Arc<Link>> {
        self.link.read().clone()
    }

    async fn link(&self) -> Result<Arc<Link>, OperationError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(OperationError::Disposed);
        }
        if let Some(link) = self.current_link() {
            return Ok(link);
        }

        let seen = self.init_attempts.load(Ordering::Acquire);
        let mut gate = self.init_gate.lock().await;
        if let Some(link) = self.current_link() {
            return Ok(link);
        }
        if gate.attempts != seen {
            if let Some(reason) = &gate.last_error {
                return Err(OperationError::Initialization(reason.clone()));
            }
        }

        let generation = gate.attempts + 1;
        let result = self.establish(generation).await;
        gate.attempts = generation;
        self.init_attempts.store(generation, Ordering::Release);

        match result {
            Ok(link) => {
                gate.last_error = None;
                if self.disposed.load(Ordering::Acquire) {
                    return Err(OperationError::Disposed);
                }
                *self.link.write() = Some(Arc::clone(&link));
                info!(generation, "worker ready");
                Ok(link)
            }
            Err(reason) => {
                warn!(generation, error = %reason, "worker initialization failed");
                gate.last_error = Some(reason.clone());
                Err(OperationError::Initialization(reason))
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<Arc<Link>, String> {
        let attempt = async {
            let HostEndpoint {
                requests,
                responses,
            } = self
                .connector
                .connect(&self.config.channel)
                .await
                .map_err(|err| format!("{err:#}"))?;

            let listener = tokio::spawn(listen(self.me.clone(), responses, generation));
            let link = Arc::new(Link {
                generation,
                requests,
                _listener: AbortOnDropHandle::new(listener),
            });

            let ping = OperationRequest::new(SYSTEM_MODULE, system_ops::GET_HEALTH);
            self.call(&link, ping, ContextSinks::default(), None, None)
                .await
                .map_err(|err| format!("readiness check failed: {err}"))?;
            Ok::<_, String>(link)
        };

        match tokio::time::timeout(self.config.init_timeout(), attempt).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "worker did not become ready within {}ms",
                self.config.init_timeout_ms
            )),
        }
    }

    /// Registers a context, sends the envelope, and waits for settlement.
    async fn call(
        &self,
        link: &Link,
        request: OperationRequest,
        sinks: ContextSinks,
        cancellation: Option<CancellationToken>,
        stream: Option<(CancellationToken, DeliveryGate)>,
    ) -> Result<(String, Value), OperationError> {
        let id = request
            .operation_id
            .clone()
            .unwrap_or_else(generate_operation_id);

        let (ctx, mut completion) =
            OperationContext::create(id.clone(), cancellation.as_ref(), sinks);
        let ctx = Arc::new(match stream {
            Some((token, gate)) => ctx.streaming(token).with_stream_gate(gate),
            None => ctx,
        });

        if self.has_stream(&id) {
            return Err(OperationError::Collision { id });
        }
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err(OperationError::Collision { id }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&ctx));
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            ctx: Arc::clone(&ctx),
        };

        debug!(
            operation_id = %id,
            module = %request.module,
            operation = %request.operation,
            "sending request"
        );
        let envelope = request.into_envelope(id.clone());

        tokio::select! {
            biased;
            () = ctx.cancelled() => {
                ctx.cancel();
            }
            sent = link.requests.send(envelope) => {
                if let Err(err) = sent {
                    ctx.reject(err.into());
                }
            }
        }

        let outcome = tokio::select! {
            biased;
            outcome = &mut completion => outcome,
            () = ctx.cancelled() => {
                ctx.cancel();
                completion.await
            }
        };

        outcome
            .unwrap_or(Err(OperationError::Cancelled))
            .map(|value| (id, value))
    }

    fn context(&self, id: &str) -> Option<Arc<OperationContext>> {
        self.pending.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn on_message(&self, response: Response) {
        let Response {
            id,
            kind,
            data,
            error,
            ..
        } = response;

        match kind {
            ResponseType::Success => {
                let Some(ctx) = self.context(&id) else {
                    return orphan(&id, &kind);
                };
                // The stream is registered before the caller wakes up.
                let opened = if ctx.is_settled() {
                    None
                } else {
                    self.open_stream(&ctx)
                };
                if !ctx.resolve(data) {
                    if let Some(seq) = opened {
                        self.streams.remove_if(&id, |_, entry| entry.seq == seq);
                    }
                    debug!(operation_id = %id, "duplicate terminal response ignored");
                }
            }
            ResponseType::Error => {
                let Some(ctx) = self.context(&id) else {
                    return orphan(&id, &kind);
                };
                let error = error.unwrap_or_else(|| WorkerError::new("worker reported an error"));
                if !ctx.reject(error.into()) {
                    debug!(operation_id = %id, "duplicate terminal response ignored");
                }
            }
            ResponseType::Progress => {
                let Some(ctx) = self.context(&id) else {
                    return orphan(&id, &kind);
                };
                match progress_percent(&data) {
                    Some(percent) => ctx.report_progress(percent),
                    None => debug!(operation_id = %id, %data, "malformed progress value"),
                }
            }
            ResponseType::StreamData => self.route_stream_event(&id, StreamEvent::Data(data)),
            ResponseType::StreamError => {
                let error =
                    error.unwrap_or_else(|| WorkerError::new("stream reported an error"));
                self.route_stream_event(&id, StreamEvent::Error(error));
            }
            ResponseType::System => {
                debug!(operation_id = %id, %data, "system message from worker");
            }
            ResponseType::Unknown(tag) => {
                warn!(operation_id = %id, kind = %tag, "unknown response type dropped");
            }
        }
    }

    fn route_stream_event(&self, id: &str, event: StreamEvent) {
        // Sinks are cloned out so no table lock is held while user code runs.
        let established = self.streams.get(id).map(|entry| {
            (
                entry.token.clone(),
                entry.gate.clone(),
                entry.on_data.clone(),
                entry.on_error.clone(),
            )
        });
        if let Some((token, gate, on_data, on_error)) = established {
            // Checked under the gate: a concurrent close either waits for
            // this delivery or wins and suppresses it.
            gate.run(|| {
                if token.is_cancelled() {
                    return;
                }
                match event {
                    StreamEvent::Data(data) => {
                        if let Some(sink) = on_data {
                            sink(data);
                        }
                    }
                    StreamEvent::Error(error) => {
                        if let Some(sink) = on_error {
                            sink(error);
                        }
                    }
                }
            });
            return;
        }

        let Some(ctx) = self.context(id) else {
            debug!(operation_id = %id, "orphaned stream event dropped");
            return;
        };
        let delivered = match event {
            StreamEvent::Data(data) => ctx.emit_data(data),
            StreamEvent::Error(error) => ctx.emit_error(error),
        };
        if !delivered {
            debug!(operation_id = %id, streaming = ctx.is_streaming(), "stream event dropped");
        }
    }

    /// Copies a streaming context's sinks into the streams table and watches
    /// its token so the entry goes away once cancelled. Returns the entry's
    /// sequence number, or `None` for non-streaming or cancelled contexts.
    fn open_stream(&self, ctx: &OperationContext) -> Option<u64> {
        let token = ctx.stream_token()?.clone();
        if token.is_cancelled() {
            return None;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let sinks = ctx.sinks();
        self.streams.insert(
            ctx.id().to_string(),
            StreamEntry {
                on_data: sinks.on_data.clone(),
                on_error: sinks.on_error.clone(),
                token: token.clone(),
                gate: ctx.stream_gate().clone(),
                seq,
            },
        );
        debug!(operation_id = %ctx.id(), "stream established");

        let state = self.me.clone();
        let id = ctx.id().to_string();
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(state) = state.upgrade() {
                state.streams.remove_if(&id, |_, entry| entry.seq == seq);
            }
        });
        Some(seq)
    }

    pub(crate) fn has_stream(&self, id: &str) -> bool {
        self.streams.get(id).is_some_and(|entry| entry.is_open())
    }

    pub(crate) fn close_stream(&self, id: &str) {
        if self
            .streams
            .remove_if(id, |_, entry| !entry.is_open())
            .is_some()
        {
            debug!(operation_id = %id, "stream closed");
        }
    }

    fn close_all_streams(&self) {
        for entry in &self.streams {
            entry.value().token.cancel();
        }
        self.streams.clear();
    }

    /// Empties the pending table and applies `settle` to each context.
    /// Returns how many contexts `settle` actually settled.
    fn cancel_all(&self, settle: impl Fn(&OperationContext) -> bool) -> usize {
        let contexts: Vec<Arc<OperationContext>> = self
            .pending
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.pending.clear();
        contexts.iter().filter(|ctx| settle(ctx)).count()
    }

    fn on_channel_closed(&self, generation: u64) {
        let stale = {
            let mut link = self.link.write();
            if link.as_ref().is_some_and(|l| l.generation == generation) {
                link.take()
            } else {
                None
            }
        };
        if stale.is_none() {
            return;
        }
        let failed = self.cancel_all(|ctx| ctx.reject(OperationError::ChannelClosed));
        self.close_all_streams();
        warn!(generation, failed, "worker channel closed");
    }
}

enum StreamEvent {
    Data(Value),
    Error(WorkerError),
}

async fn listen(state: Weak<HostState>, mut responses: mpsc::Receiver<Response>, generation: u64) {
    while let Some(response) = responses.recv().await {
        let Some(state) = state.upgrade() else {
            return;
        };
        state.on_message(response);
    }
    if let Some(state) = state.upgrade() {
        state.on_channel_closed(generation);
    }
}

fn orphan(id: &str, kind: &ResponseType) {
    debug!(operation_id = %id, kind = %kind, "orphaned response dropped");
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn progress_percent(data: &Value) -> Option<u8> {
    let raw = data.as_u64().or_else(|| {
        data.as_f64()
            .filter(|pct| pct.is_finite() && *pct >= 0.0)
            .map(|pct| pct.round() as u64)
    })?;
    Some(raw.min(100) as u8)
}

/// Deserializes a SUCCESS payload, falling back to parsing it as JSON text
/// when the worker sent the value pre-serialized.
fn coerce<T: DeserializeOwned>(value: Value) -> Result<T, OperationError> {
    if let Value::String(raw) = &value {
        return match serde_json::from_value(value.clone()) {
            Ok(typed) => Ok(typed),
            Err(err) => serde_json::from_str(raw).map_err(|_| err.into()),
        };
    }
    Ok(serde_json::from_value(value)?)
}
