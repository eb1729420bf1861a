//! In-process contexts for the embedded backend.

use super::{ProjectContext, ProjectContextFactory};
use crate::error::Result;
use crate::lock::{InProcessLock, LockRegistry, OperationTracker, ProjectLock};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};

/// A project name paired with an [`InProcessLock`]. Closing releases the lock.
pub struct GenericProjectContext {
    lock: InProcessLock,
}

impl GenericProjectContext {
    /// Wraps an existing lock.
    pub fn new(lock: InProcessLock) -> Self {
        Self { lock }
    }
}

impl ProjectContext for GenericProjectContext {
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

/// Factory for [`GenericProjectContext`], sharing one registry and tracker.
pub struct GenericProjectContextFactory {
    registry: Arc<LockRegistry>,
    tracker: Arc<OperationTracker>,
}

impl GenericProjectContextFactory {
    /// Creates a factory with a fresh registry and tracker.
    pub fn new() -> Self {
        Self::with_tracker(Arc::new(OperationTracker::new()))
    }

    /// Creates a factory that registers operations with `tracker`.
    pub fn with_tracker(tracker: Arc<OperationTracker>) -> Self {
        Self {
            registry: Arc::new(LockRegistry::new()),
            tracker,
        }
    }

    /// The lock registry shared by every context this factory makes.
    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// The operation tracker shared by every context this factory makes.
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }
}

impl Default for GenericProjectContextFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectContextFactory for GenericProjectContextFactory {
    fn make_project_context(&self, project_name: &str) -> Result<Box<dyn ProjectContext>> {
        debug!(project = %project_name, "Making project context (generic)");
        let lock = InProcessLock::new(project_name, self.registry.clone(), self.tracker.clone());
        Ok(Box::new(GenericProjectContext::new(lock)))
    }

    fn close(&self) {
        info!("Closing generic project context factory");
        self.tracker.drain_and_wait();
    }
}
