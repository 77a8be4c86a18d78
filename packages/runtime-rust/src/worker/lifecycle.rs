//! Worker lifecycle state with in-flight handler tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions and an atomic counter with
//! RAII guards so the drain wait sees an accurate count even when a handler
//! panics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;

/// Worker state machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Modules are being registered; the init announcement has not gone out.
    Starting,
    Ready,
    /// `dispose` was received; new requests are refused.
    Draining,
    Stopped,
}

impl WorkerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks worker state, running handlers, and the shutdown signal.
#[derive(Debug)]
pub struct Lifecycle {
    state: ArcSwap<WorkerState>,
    in_flight: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(WorkerState::Starting),
            in_flight: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        **self.state.load()
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(WorkerState::Ready));
    }

    /// Requests are accepted in `Starting` and `Ready` only.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        matches!(self.state(), WorkerState::Starting | WorkerState::Ready)
    }

    /// Moves to `Draining` and fires the shutdown token. Handlers observe it
    /// through their operation handle.
    pub fn begin_drain(&self) {
        self.state.store(Arc::new(WorkerState::Draining));
        self.shutdown.cancel();
    }

    /// Token cancelled when draining begins. Per-operation tokens are
    /// children of it.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Counts a running handler until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for running handlers to finish, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` once the count reaches zero;
    /// returns `false` if the timeout expired first (state stays `Draining`).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.state.store(Arc::new(WorkerState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_accepting_in_starting_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), WorkerState::Starting);
        assert!(lifecycle.is_accepting());
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[test]
    fn drain_stops_accepting_and_cancels_token() {
        let lifecycle = Lifecycle::new();
        lifecycle.set_ready();
        assert_eq!(lifecycle.state(), WorkerState::Ready);

        let child = lifecycle.shutdown_token().child_token();
        lifecycle.begin_drain();

        assert_eq!(lifecycle.state(), WorkerState::Draining);
        assert!(!lifecycle.is_accepting());
        assert!(child.is_cancelled());
    }

    #[test]
    fn guards_track_in_flight_count() {
        let lifecycle = Lifecycle::new();
        let a = lifecycle.in_flight_guard();
        let b = lifecycle.in_flight_guard();
        assert_eq!(lifecycle.in_flight_count(), 2);
        drop(a);
        assert_eq!(lifecycle.in_flight_count(), 1);
        drop(b);
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn drain_completes_when_guards_drop() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.begin_drain();
        let guard = lifecycle.in_flight_guard();

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.wait_for_drain(Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);

        assert!(waiter.await.unwrap());
        assert_eq!(lifecycle.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn drain_times_out_with_stuck_handler() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_drain();
        let _guard = lifecycle.in_flight_guard();

        assert!(!lifecycle.wait_for_drain(Duration::from_millis(40)).await);
        assert_eq!(lifecycle.state(), WorkerState::Draining);
    }

    #[test]
    fn state_names() {
        assert_eq!(WorkerState::Ready.to_string(), "ready");
        assert_eq!(WorkerState::Draining.as_str(), "draining");
    }
}
