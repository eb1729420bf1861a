//! Wiring of stores, contexts and the swap job from a [`Config`].

use crate::config::{Config, DatabaseKind, SwapStoreKind};
use crate::context::{ContextStore, GenericProjectContextFactory};
use crate::db::{DbStore, RedbStore};
use crate::error::{BridgeError, Result};
use crate::repo_store::{FsRepoStore, RepoStore};
use crate::storage_lock::StorageLock;
use crate::swap::{NoopSwapJob, SwapJob, SwapJobImpl, SwapSettings};
use crate::swap_store::{DirSwapStore, InMemorySwapStore, SwapStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Running bridge components.
///
/// Owns everything a serving process needs. [`Services::shutdown`] stops
/// the swap job, then drains and stops the context store; dropping does the
/// same.
pub struct Services {
    config: Config,
    context_store: Arc<ContextStore>,
    db_store: Arc<dyn DbStore>,
    repo_store: Arc<dyn RepoStore>,
    swap_job: Arc<dyn SwapJob>,
    shut_down: AtomicBool,
    // Released last so no other process can take the root mid-shutdown.
    _storage_lock: Option<StorageLock>,
}

impl Services {
    /// Builds every component. The swap job is created but not started.
    ///
    /// # Errors
    ///
    /// `StorageLocked` if another process serves the same embedded root.
    /// `ConfigError` for the postgres backend without the `postgres` feature,
    /// or for a `memory` swap store: its blobs vanish with the process, taking
    /// every evicted project with them.
    pub fn from_config(config: Config) -> Result<Self> {
        Self::build(config, false)
    }

    /// Like [`Services::from_config`], but accepts a `memory` swap store.
    ///
    /// Projects evicted into it are lost once these services are dropped.
    /// Meant for tests.
    pub fn from_config_with_memory_swap(config: Config) -> Result<Self> {
        Self::build(config, true)
    }

    fn build(config: Config, allow_memory_swap: bool) -> Result<Self> {
        config.validate()?;
        if let Some(swap) = &config.swap {
            if swap.store.kind == SwapStoreKind::Memory && !allow_memory_swap {
                return Err(BridgeError::ConfigError(
                    "swap.store kind \"memory\" loses evicted projects on exit; use \"dir\"".into(),
                ));
            }
        }
        info!(config = ?config.sanitized(), "Starting bridge services");

        let repo_store: Arc<dyn RepoStore> = Arc::new(FsRepoStore::new(&config.storage.root_dir)?);

        let (storage_lock, db_store, context_store) = match config.database.kind {
            DatabaseKind::Embedded => {
                let lock = StorageLock::acquire(config.state_dir())?;
                let db: Arc<dyn DbStore> = Arc::new(RedbStore::open(config.database_path())?);
                let contexts = ContextStore::new(GenericProjectContextFactory::new());
                (Some(lock), db, Arc::new(contexts))
            }
            DatabaseKind::Postgres => {
                let (db, contexts) = Self::postgres_backend(&config)?;
                (None, db, contexts)
            }
        };

        let swap_job: Arc<dyn SwapJob> = match &config.swap {
            Some(swap) => {
                let swap_store: Arc<dyn SwapStore> = match swap.store.kind {
                    SwapStoreKind::Dir => Arc::new(DirSwapStore::new(
                        swap.store
                            .path
                            .clone()
                            .unwrap_or_else(|| config.state_dir().join("swap")),
                    )?),
                    SwapStoreKind::Memory => Arc::new(InMemorySwapStore::new()),
                };
                Arc::new(SwapJobImpl::new(
                    SwapSettings::from_config(swap),
                    context_store.clone(),
                    repo_store.clone(),
                    db_store.clone(),
                    swap_store,
                ))
            }
            None => {
                info!("Swap not configured");
                Arc::new(NoopSwapJob::new(db_store.clone()))
            }
        };

        Ok(Self {
            config,
            context_store,
            db_store,
            repo_store,
            swap_job,
            shut_down: AtomicBool::new(false),
            _storage_lock: storage_lock,
        })
    }

    #[cfg(feature = "postgres")]
    fn postgres_backend(config: &Config) -> Result<(Arc<dyn DbStore>, Arc<ContextStore>)> {
        use crate::context::PostgresProjectContextFactory;
        use crate::db::{PostgresConnectionPool, PostgresOptions, PostgresStore};

        let options = PostgresOptions::from_config(&config.database)?;
        let pool = PostgresConnectionPool::connect(&options)?;
        let store = PostgresStore::new(pool.clone());
        store.initialize_schema()?;
        let contexts = ContextStore::new(PostgresProjectContextFactory::new(pool));
        Ok((Arc::new(store), Arc::new(contexts)))
    }

    #[cfg(not(feature = "postgres"))]
    fn postgres_backend(_config: &Config) -> Result<(Arc<dyn DbStore>, Arc<ContextStore>)> {
        Err(BridgeError::ConfigError(
            "postgres backend requested but bridge was built without the `postgres` feature"
                .into(),
        ))
    }

    /// The configuration these services were built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs operations under project locks.
    pub fn context_store(&self) -> &Arc<ContextStore> {
        &self.context_store
    }

    /// Project rows.
    pub fn db_store(&self) -> &Arc<dyn DbStore> {
        &self.db_store
    }

    /// On-disk repositories.
    pub fn repo_store(&self) -> &Arc<dyn RepoStore> {
        &self.repo_store
    }

    /// The swap job. A no-op job when swapping is not configured.
    pub fn swap_job(&self) -> &Arc<dyn SwapJob> {
        &self.swap_job
    }

    /// The swap job and its settings, or an error naming the missing
    /// configuration.
    pub fn require_swap_job(&self) -> Result<(&Arc<dyn SwapJob>, &SwapSettings)> {
        let settings = self
            .swap_job
            .settings()
            .ok_or_else(|| BridgeError::ConfigError("no [swap] section in configuration".into()))?;
        Ok((&self.swap_job, settings))
    }

    /// Stops the swap job, then drains in-flight operations. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down bridge services");
        self.swap_job.stop();
        self.context_store.stop();
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.shutdown();
    }
}
