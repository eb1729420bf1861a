//! Contexts for the shared postgres backend.

use super::{ProjectContext, ProjectContextFactory};
use crate::db::PostgresConnectionPool;
use crate::error::{BridgeError, Result};
use crate::lock::{OperationTracker, PostgresLock, ProjectLock};
use sqlx::{Postgres, Transaction};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};

/// A [`PostgresLock`] plus the transaction it holds the row lock in.
///
/// Store queries for this project must go through [`Self::transaction`] so
/// they run inside the lock and commit or roll back with the operation.
pub struct PostgresProjectContext {
    lock: PostgresLock,
}

impl PostgresProjectContext {
    /// Wraps an unlocked lock.
    pub fn new(lock: PostgresLock) -> Self {
        Self { lock }
    }

    /// The open transaction.
    ///
    /// # Errors
    ///
    /// `ContextNotLocked` unless the lock is held.
    pub fn transaction(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        let name = self.lock.project_name().to_string();
        self.lock
            .transaction()
            .ok_or(BridgeError::ContextNotLocked(name))
    }
}

impl ProjectContext for PostgresProjectContext {
    fn project_name(&self) -> &str {
        self.lock.project_name()
    }

    fn lock(&mut self) -> &mut dyn ProjectLock {
        &mut self.lock
    }

    fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    fn close(&mut self) -> Result<()> {
        self.lock.close()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Factory for [`PostgresProjectContext`]. Owns the connection pool.
pub struct PostgresProjectContextFactory {
    pool: PostgresConnectionPool,
    tracker: Arc<OperationTracker>,
}

impl PostgresProjectContextFactory {
    /// Creates a factory with a fresh operation tracker.
    pub fn new(pool: PostgresConnectionPool) -> Self {
        info!("Initialize postgres project context factory");
        Self {
            pool,
            tracker: Arc::new(OperationTracker::new()),
        }
    }

    /// The operation tracker shared by every context this factory makes.
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }
}

impl ProjectContextFactory for PostgresProjectContextFactory {
    fn make_project_context(&self, project_name: &str) -> Result<Box<dyn ProjectContext>> {
        debug!(project = %project_name, "Making project context (postgres)");
        let lock = PostgresLock::new(project_name, self.pool.clone(), self.tracker.clone());
        Ok(Box::new(PostgresProjectContext::new(lock)))
    }

    fn close(&self) {
        info!("Closing postgres project context factory");
        self.tracker.drain_and_wait();
        self.pool.close();
    }
}
