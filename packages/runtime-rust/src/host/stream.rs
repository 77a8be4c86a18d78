//! Streams that outlive their operation's terminal SUCCESS.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use tokio_util::sync::CancellationToken;

use super::context::{DataSink, ErrorSink};
use super::orchestrator::HostState;

/// Serialises sink invocations of one stream against its `close`.
///
/// Reentrant so a sink may close its own stream.
#[derive(Clone, Default)]
pub(crate) struct DeliveryGate(Arc<ReentrantMutex<()>>);

impl DeliveryGate {
    /// Runs `deliver` while holding the gate.
    pub(crate) fn run<R>(&self, deliver: impl FnOnce() -> R) -> R {
        let _held = self.0.lock();
        deliver()
    }

    /// Blocks until no sink of this stream is running.
    pub(crate) fn wait(&self) {
        drop(self.0.lock());
    }
}

/// Sinks of an established stream, kept in the orchestrator's streams table.
pub(crate) struct StreamEntry {
    pub(crate) on_data: Option<DataSink>,
    pub(crate) on_error: Option<ErrorSink>,
    pub(crate) token: CancellationToken,
    pub(crate) gate: DeliveryGate,
    pub(crate) seq: u64,
}

impl StreamEntry {
    pub(crate) fn is_open(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// Caller's handle on an established stream.
///
/// Dropping the handle leaves the stream running; call [`close`] or cancel
/// the token passed to `execute_streaming` to stop delivery.
///
/// [`close`]: StreamSubscription::close
pub struct StreamSubscription {
    id: String,
    token: CancellationToken,
    gate: DeliveryGate,
    state: Weak<HostState>,
}

impl StreamSubscription {
    pub(crate) fn new(
        id: String,
        token: CancellationToken,
        gate: DeliveryGate,
        state: Weak<HostState>,
    ) -> Self {
        Self {
            id,
            token,
            gate,
            state,
        }
    }

    /// Operation id the stream events arrive under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .state
                .upgrade()
                .is_some_and(|state| state.has_stream(&self.id))
    }

    /// Stops local delivery and drops the stream's sinks. The worker is
    /// not told; modules expose their own stop operation for that.
    ///
    /// Waits for a sink invocation already running on another thread, so no
    /// sink runs once `close` returns. Called from inside one of this
    /// stream's sinks, it only blocks deliveries that come after.
    pub fn close(&self) {
        self.token.cancel();
        self.gate.wait();
        if let Some(state) = self.state.upgrade() {
            state.close_stream(&self.id);
        }
    }
}

impl fmt::Debug for StreamSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Terminal value of a streaming call plus its subscription.
#[derive(Debug)]
pub struct StreamingResult<T> {
    pub value: T,
    pub subscription: StreamSubscription,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn wait_inside_a_delivery_does_not_deadlock() {
        let gate = DeliveryGate::default();
        let finished = gate.run(|| {
            gate.wait();
            true
        });
        assert!(finished);
    }

    #[test]
    fn wait_blocks_until_the_running_delivery_returns() {
        let gate = DeliveryGate::default();
        let done = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = mpsc::channel();

        let worker = {
            let (gate, done) = (gate.clone(), Arc::clone(&done));
            std::thread::spawn(move || {
                gate.run(|| {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    done.store(true, Ordering::SeqCst);
                });
            })
        };

        entered_rx.recv().unwrap();
        gate.wait();
        assert!(done.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
