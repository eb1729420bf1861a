//! The context store: runs operations inside a locked project context.

use super::{ProjectContext, ProjectContextFactory};
use crate::error::{BridgeError, Result};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info, warn};

static GLOBAL: RwLock<Option<Arc<ContextStore>>> = RwLock::new(None);

/// Hands out project contexts and runs closures with the project locked.
///
/// [`ContextStore::in_context_with_lock`] is the only sanctioned way to
/// touch a project's row or its on-disk repository. Each call opens a fresh
/// call scope; nested locking of other projects goes through
/// [`ProjectScope::in_context_with_lock`] so a project already open further
/// up the chain is caught instead of deadlocking.
///
/// # Examples
///
/// ```
/// use bridge_core::{BridgeError, ContextStore, GenericProjectContextFactory};
///
/// let store = ContextStore::new(GenericProjectContextFactory::new());
/// let name = store
///     .in_context_with_lock("proj1", |scope| {
///         assert!(scope.context().is_locked());
///         Ok::<_, BridgeError>(scope.project_name().to_string())
///     })
///     .unwrap();
/// assert_eq!(name, "proj1");
/// store.stop();
/// ```
pub struct ContextStore {
    factory: Box<dyn ProjectContextFactory>,
    stopping: AtomicBool,
}

impl ContextStore {
    /// Creates a store backed by `factory`.
    pub fn new(factory: impl ProjectContextFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            stopping: AtomicBool::new(false),
        }
    }

    /// Installs the process-wide store. Must be called once during startup.
    ///
    /// # Errors
    ///
    /// Returns `ContextStoreAlreadyInitialized` if a store is installed.
    pub fn install(store: Arc<ContextStore>) -> Result<()> {
        info!("Initialize context store");
        let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
        if global.is_some() {
            error!("Context store already initialized");
            return Err(BridgeError::ContextStoreAlreadyInitialized);
        }
        *global = Some(store);
        Ok(())
    }

    /// Returns the process-wide store.
    pub fn global() -> Result<Arc<ContextStore>> {
        GLOBAL
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BridgeError::ContextStoreNotInitialized)
    }

    /// Stops and removes the process-wide store, if any.
    pub fn uninstall() -> Option<Arc<ContextStore>> {
        let store = GLOBAL
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(store) = &store {
            store.stop();
        }
        store
    }

    /// Runs `f` with `project_name` locked, then releases everything.
    ///
    /// The lock is marked successful only if `f` returns `Ok`; for
    /// transactional backends that decides commit versus rollback. Cleanup
    /// runs on every exit path and `f`'s error is returned unchanged.
    ///
    /// Each call starts a new call chain, so the `ContextAlreadyOpen` guard
    /// cannot see contexts opened by an enclosing call. Code already running
    /// inside `f` must lock further projects through
    /// [`ProjectScope::in_context_with_lock`] instead. Re-entering the same
    /// project here works with the in-process lock, but the postgres lock
    /// waits on its own row and fails with `LockBusy` once the lock timeout
    /// expires.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` after [`ContextStore::stop`], `LockBusy` if the lock
    /// wait expired, a release failure after a successful `f`, or `f`'s own
    /// error.
    pub fn in_context_with_lock<R, E, F>(&self, project_name: &str, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut ProjectScope<'_>) -> std::result::Result<R, E>,
        E: From<BridgeError> + Display,
    {
        let mut open = HashSet::new();
        self.run_locked(&mut open, project_name, f)
    }

    fn run_locked<R, E, F>(
        &self,
        open: &mut HashSet<String>,
        project_name: &str,
        f: F,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut ProjectScope<'_>) -> std::result::Result<R, E>,
        E: From<BridgeError> + Display,
    {
        if open.contains(project_name) {
            error!(project = %project_name, "Context already open in this call chain");
            return Err(BridgeError::ContextAlreadyOpen(project_name.to_string()).into());
        }
        if self.is_stopping() {
            return Err(BridgeError::ShuttingDown.into());
        }

        let mut context = self.factory.make_project_context(project_name)?;
        open.insert(project_name.to_string());

        let outcome = self.run_with_lock(&mut context, open, f);

        let released = context.lock().close().and(context.close());
        open.remove(project_name);

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => {
                error!(project = %project_name, error = %e, "Failed to release lock");
                Err(e.into())
            }
            (Err(e), released) => {
                if let Err(release_err) = released {
                    warn!(project = %project_name, error = %release_err, "Failed to release lock after error");
                }
                error!(project = %project_name, error = %e, "Error in context with lock");
                Err(e)
            }
        }
    }

    fn run_with_lock<R, E, F>(
        &self,
        context: &mut Box<dyn ProjectContext>,
        open: &mut HashSet<String>,
        f: F,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut ProjectScope<'_>) -> std::result::Result<R, E>,
        E: From<BridgeError> + Display,
    {
        context.lock().lock()?;
        let value = f(&mut ProjectScope {
            store: self,
            context: &mut *context,
            open: &mut *open,
        })?;
        context.lock().success();
        Ok(value)
    }

    /// Refuses new operations, drains the in-flight ones, and closes the
    /// factory's pooled resources. Idempotent.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping context store");
        self.factory.close();
    }

    /// True once [`ContextStore::stop`] has been called.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// The open, locked context handed to an operation, plus the call chain it
/// belongs to.
pub struct ProjectScope<'a> {
    store: &'a ContextStore,
    context: &'a mut Box<dyn ProjectContext>,
    open: &'a mut HashSet<String>,
}

impl ProjectScope<'_> {
    /// Name of the locked project.
    pub fn project_name(&self) -> &str {
        self.context.project_name()
    }

    /// The locked context, for store and swap operations.
    pub fn context(&mut self) -> &mut dyn ProjectContext {
        self.context.as_mut()
    }

    /// Locks another project within the same call chain.
    ///
    /// # Errors
    ///
    /// `ContextAlreadyOpen` if `project_name` is already open in this chain,
    /// otherwise as [`ContextStore::in_context_with_lock`].
    pub fn in_context_with_lock<R, E, F>(&mut self, project_name: &str, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut ProjectScope<'_>) -> std::result::Result<R, E>,
        E: From<BridgeError> + Display,
    {
        self.store.run_locked(&mut *self.open, project_name, f)
    }
}
