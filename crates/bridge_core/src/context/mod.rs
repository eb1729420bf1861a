//! Per-operation project contexts.
//!
//! A context bundles a project's lock with any other resources an operation
//! needs while it holds that lock. For the postgres backend that is the
//! pooled connection and the open transaction the row lock lives in, which
//! per-project store queries must run on.
//!
//! Contexts are passed explicitly down the call chain. The intended use is
//! to open one at the top of an operation with
//! [`ContextStore::in_context_with_lock`] and hand `scope.context()` to
//! whatever deeper code needs it.

mod generic;
#[cfg(feature = "postgres")]
mod postgres;
mod store;

pub use generic::{GenericProjectContext, GenericProjectContextFactory};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresProjectContext, PostgresProjectContextFactory};
pub use store::{ContextStore, ProjectScope};

use crate::error::{BridgeError, Result};
use crate::lock::ProjectLock;
use std::any::Any;

/// Resources held for one locked operation on one project.
pub trait ProjectContext: Send {
    /// Name of the project.
    fn project_name(&self) -> &str;

    /// The project's lock.
    fn lock(&mut self) -> &mut dyn ProjectLock;

    /// True while the lock is held.
    fn is_locked(&self) -> bool;

    /// Releases everything the context holds. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Access to the concrete context, for backends that pair with one.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn ProjectContext + '_ {
    /// Fails with `ContextNotLocked` unless the lock is held.
    pub fn ensure_locked(&self) -> Result<()> {
        if self.is_locked() {
            Ok(())
        } else {
            Err(BridgeError::ContextNotLocked(self.project_name().to_string()))
        }
    }
}

/// Builds contexts for one backend and owns the backend's shared resources.
pub trait ProjectContextFactory: Send + Sync {
    /// Creates a context for `project_name`. The lock is not yet taken.
    fn make_project_context(&self, project_name: &str) -> Result<Box<dyn ProjectContext>>;

    /// Drains in-flight operations, then releases pooled resources.
    fn close(&self);
}
