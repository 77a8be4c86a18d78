//! Process-wide state shared between modules.

use std::sync::Arc;

use parking_lot::RwLock;

/// A value computed once on first use and shared by every module it is
/// injected into, e.g. the result of probing which storage backend is
/// available. `reset` forgets the value so the next access recomputes it.
#[derive(Debug)]
pub struct SharedState<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> SharedState<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Returns the stored value, initialising it with `init` if empty.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> Arc<T> {
        if let Some(value) = self.slot.read().as_ref() {
            return Arc::clone(value);
        }
        let mut slot = self.slot.write();
        Arc::clone(slot.get_or_insert_with(|| Arc::new(init())))
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    pub fn reset(&self) {
        self.slot.write().take();
    }
}

impl<T> Default for SharedState<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn initialises_once() {
        let state = SharedState::new();
        let calls = AtomicU32::new(0);
        let probe = || {
            calls.fetch_add(1, Ordering::SeqCst);
            "indexeddb"
        };

        assert_eq!(*state.get_or_init(probe), "indexeddb");
        assert_eq!(*state.get_or_init(probe), "indexeddb");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_forces_recompute() {
        let state = SharedState::new();
        state.get_or_init(|| 1);
        state.reset();
        assert!(state.get().is_none());
        assert_eq!(*state.get_or_init(|| 2), 2);
    }

    #[test]
    fn shared_across_threads() {
        let state = Arc::new(SharedState::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || *state.get_or_init(|| i))
            })
            .collect();
        let values: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] == w[1]));
    }
}
