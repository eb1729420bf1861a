//! In-flight operation tracking for clean shutdown.
//!
//! Every project lock registers itself here for as long as it is held. At
//! shutdown `drain_and_wait` refuses new registrations and blocks until the
//! outstanding ones have ended, so no operation is left holding a pooled
//! connection after the pool is closed.

use crate::error::{BridgeError, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Progress callback invoked with the number of operations still running.
pub type DrainWaiter = dyn Fn(usize) + Send + Sync;

#[derive(Debug, Default)]
struct TrackerState {
    active: usize,
    draining: bool,
}

/// Reader/writer style barrier over in-flight operations.
///
/// Registrations play the role of read locks: any number may be held at
/// once. Draining plays the role of the write lock: once it starts, new
/// registrations fail with [`BridgeError::ShuttingDown`] and the drain call
/// blocks until the count reaches zero.
pub struct OperationTracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
    waiter: Box<DrainWaiter>,
}

impl OperationTracker {
    /// Creates a tracker whose waiter logs drain progress.
    pub fn new() -> Self {
        Self::with_waiter(|remaining| info!(remaining, "Waiting for {} operations...", remaining))
    }

    /// Creates a tracker with a custom progress callback.
    ///
    /// The waiter is advisory; it runs outside the tracker's internal lock.
    pub fn with_waiter(waiter: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            idle: Condvar::new(),
            waiter: Box::new(waiter),
        }
    }

    /// Registers the start of an operation.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` once draining has begun.
    pub fn register_start(&self) -> Result<()> {
        let mut state = self.state();
        if state.draining {
            return Err(BridgeError::ShuttingDown);
        }
        state.active += 1;
        Ok(())
    }

    /// Registers the end of an operation. Never fails.
    pub fn register_end(&self) {
        let (remaining, draining) = {
            let mut state = self.state();
            state.active = state.active.saturating_sub(1);
            if state.active == 0 {
                self.idle.notify_all();
            }
            (state.active, state.draining)
        };
        if draining && remaining > 0 {
            (self.waiter)(remaining);
        }
    }

    /// Stops new registrations and blocks until every registered operation
    /// has ended. The waiter hears the outstanding count first, then once per
    /// ending operation while any remain.
    pub fn drain_and_wait(&self) {
        info!("Draining operation tracker");
        let remaining = {
            let mut state = self.state();
            state.draining = true;
            state.active
        };
        (self.waiter)(remaining);

        let mut state = self.state();
        while state.active > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Number of operations currently registered.
    pub fn active(&self) -> usize {
        self.state().active
    }

    /// True once `drain_and_wait` has been called.
    pub fn is_draining(&self) -> bool {
        self.state().draining
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new()
    }
}
