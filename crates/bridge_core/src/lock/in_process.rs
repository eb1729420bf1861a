//! Reentrant in-process project locks.

use super::{OperationTracker, ProjectLock};
use crate::error::{BridgeError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// Thread-owned reentrant mutex with split lock/unlock calls.
#[derive(Debug, Default)]
pub(crate) struct ReentrantMutex {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl ReentrantMutex {
    fn owner(&self) -> MutexGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock(&self) {
        let me = thread::current().id();
        let mut owner = self.owner();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    return;
                }
                Some(holder) if holder == me => {
                    owner.depth += 1;
                    return;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Returns false if the calling thread doesn't hold the mutex.
    pub(crate) fn unlock(&self) -> bool {
        let mut owner = self.owner();
        if owner.thread != Some(thread::current().id()) {
            return false;
        }
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.released.notify_one();
        }
        true
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        self.owner().depth
    }
}

struct RegistryEntry {
    mutex: Arc<ReentrantMutex>,
    refs: usize,
}

/// Process-wide map from project name to its mutex and reference count.
///
/// The mutex for a name is created on the first reference and dropped from
/// the map when the last reference is released, so idle projects cost
/// nothing. Acquire and release are each a single step under the map lock.
#[derive(Default)]
pub struct LockRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl LockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn acquire(&self, project_name: &str) -> Arc<ReentrantMutex> {
        let mut entries = self.entries();
        let entry = entries
            .entry(project_name.to_string())
            .or_insert_with(|| RegistryEntry {
                mutex: Arc::new(ReentrantMutex::default()),
                refs: 0,
            });
        entry.refs += 1;
        entry.mutex.clone()
    }

    pub(crate) fn release(&self, project_name: &str) {
        let mut entries = self.entries();
        match entries.get_mut(project_name) {
            Some(entry) if entry.refs > 1 => entry.refs -= 1,
            Some(_) => {
                entries.remove(project_name);
            }
            None => warn!(project = %project_name, "Released a lock reference that was never taken"),
        }
    }

    /// Number of live references to the project's mutex (0 if none exists).
    pub fn ref_count(&self, project_name: &str) -> usize {
        self.entries().get(project_name).map_or(0, |e| e.refs)
    }

    /// Number of projects that currently have a mutex.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True if no project has a mutex.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// In-process [`ProjectLock`].
///
/// Each instance holds one reference in the [`LockRegistry`] from
/// construction until drop. Locking is reentrant per thread; every `lock`
/// needs a matching `unlock`, or a single `close`. `success` is a no-op.
pub struct InProcessLock {
    project_name: String,
    registry: Arc<LockRegistry>,
    mutex: Arc<ReentrantMutex>,
    tracker: Arc<OperationTracker>,
    depth: usize,
}

impl InProcessLock {
    /// Creates a lock object for `project_name`, taking a registry reference.
    pub fn new(
        project_name: &str,
        registry: Arc<LockRegistry>,
        tracker: Arc<OperationTracker>,
    ) -> Self {
        let mutex = registry.acquire(project_name);
        Self {
            project_name: project_name.to_string(),
            registry,
            mutex,
            tracker,
            depth: 0,
        }
    }
}

impl ProjectLock for InProcessLock {
    fn project_name(&self) -> &str {
        &self.project_name
    }

    fn lock(&mut self) -> Result<()> {
        if self.depth == 0 {
            self.tracker.register_start()?;
        }
        debug!(project = %self.project_name, "Trying to get lock");
        self.mutex.lock();
        self.depth += 1;
        debug!(project = %self.project_name, depth = self.depth, "Got lock");
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Ok(());
        }
        if !self.mutex.unlock() {
            return Err(BridgeError::LockNotHeld(self.project_name.clone()));
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.tracker.register_end();
            debug!(project = %self.project_name, "Released lock");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        while self.depth > 0 {
            self.unlock()?;
        }
        Ok(())
    }

    fn success(&mut self) {}

    fn is_locked(&self) -> bool {
        self.depth > 0
    }
}

impl Drop for InProcessLock {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(project = %self.project_name, error = %e, "Dropped a lock held by another thread");
            // The holder thread is gone from this call chain; still end the
            // tracker registration so shutdown cannot hang on it.
            if self.depth > 0 {
                self.tracker.register_end();
            }
        }
        self.registry.release(&self.project_name);
    }
}
