//! Per-project mutual exclusion.
//!
//! A [`ProjectLock`] guards one project's mutable state (its database row and
//! its on-disk repository). Two variants exist: [`InProcessLock`], a
//! reentrant mutex shared through a reference-counted [`LockRegistry`], and
//! `PostgresLock` (feature `postgres`), a `SELECT ... FOR UPDATE` row lock
//! held inside an open transaction.
//!
//! Both variants register with an [`OperationTracker`] while held so that
//! shutdown can drain in-flight work.

mod in_process;
#[cfg(feature = "postgres")]
mod postgres;
mod tracker;

pub use in_process::{InProcessLock, LockRegistry};
#[cfg(feature = "postgres")]
pub use postgres::PostgresLock;
pub use tracker::{DrainWaiter, OperationTracker};

use crate::error::Result;

/// Lock on a single project.
///
/// Unlike a plain mutex this distinguishes success from failure: backends
/// with transactions commit on release only after [`ProjectLock::success`]
/// has been called, and roll back otherwise.
pub trait ProjectLock: Send {
    /// Name of the project this lock guards.
    fn project_name(&self) -> &str;

    /// Blocks until the lock is held.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` if the operation tracker is draining, `LockBusy` if a
    /// bounded wait expired.
    fn lock(&mut self) -> Result<()>;

    /// Releases one level of the lock. A no-op when not held.
    fn unlock(&mut self) -> Result<()>;

    /// Releases the lock entirely. Idempotent.
    fn close(&mut self) -> Result<()> {
        self.unlock()
    }

    /// Marks the guarded operation as having completed without error.
    fn success(&mut self);

    /// True while this lock object holds the project.
    fn is_locked(&self) -> bool;
}
