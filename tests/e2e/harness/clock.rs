use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Controllable time for `last_accessed` ordering.
///
/// Pass `as_provider()` to the stores and the swap job with
/// `with_time_provider()` so that which project is "oldest" is decided by
/// the scenario, not by how fast the test runs.
#[derive(Clone)]
pub struct MockClock {
    current: Arc<AtomicI64>,
}

impl MockClock {
    /// Creates a time provider function returning Unix milliseconds.
    pub fn as_provider(&self) -> impl Fn() -> i64 + Send + Sync + 'static {
        let current = self.current.clone();
        move || current.load(Ordering::SeqCst)
    }
}

impl MockClock {
    /// Create a new mock clock starting at the current time
    pub fn new() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;

        Self {
            current: Arc::new(AtomicI64::new(now)),
        }
    }

    /// Get current timestamp in milliseconds
    pub fn now(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Advance time by duration
    pub fn advance(&self, duration: Duration) {
        self.current
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    /// Advance time by minutes
    pub fn advance_minutes(&self, minutes: u64) {
        self.advance(Duration::from_secs(minutes * 60));
    }

    /// Advance time by hours
    pub fn advance_hours(&self, hours: u64) {
        self.advance(Duration::from_secs(hours * 3600));
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}
