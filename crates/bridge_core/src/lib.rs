//! Bridge Core Library
//!
//! Keeps remote projects mirrored as local repositories while providing:
//! - Per-project mutual exclusion (in-process and postgres row locks)
//! - Operation contexts that own a project's lock for one operation
//! - A drain barrier so shutdown waits for in-flight work
//! - A swap job that keeps disk usage between two watermarks by moving
//!   least-recently-used projects to swap storage
//!
//! # Quick Start
//!
//! ```
//! use bridge_core::{ContextStore, DbStore, GenericProjectContextFactory, RedbStore};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let db = RedbStore::open(tmp.path().join("bridge.redb")).unwrap();
//! let contexts = ContextStore::new(GenericProjectContextFactory::new());
//!
//! // Every read or write of a project's row happens under its lock.
//! contexts
//!     .in_context_with_lock("proj1", |scope| {
//!         db.set_latest_version_for_project(scope.context(), 3)
//!     })
//!     .unwrap();
//!
//! let version = contexts
//!     .in_context_with_lock("proj1", |scope| {
//!         db.get_latest_version_for_project(scope.context())
//!     })
//!     .unwrap();
//! assert_eq!(version, 3);
//! ```
//!
//! # Backends
//!
//! The embedded backend pairs [`RedbStore`] with [`InProcessLock`] and guards
//! the storage root with a [`StorageLock`] so only one process serves it. The
//! `postgres` feature adds a shared backend whose locks are `SELECT ... FOR
//! UPDATE` row locks, so several processes can serve the same projects.
//! [`Services::from_config`] picks one from the configuration.

mod config;
mod context;
mod db;
mod error;
mod lock;
mod repo_store;
mod services;
mod storage_lock;
mod swap;
mod swap_store;

pub use config::{
    Config, DatabaseConfig, DatabaseKind, PoolSettings, StorageConfig, SwapConfig,
    SwapStoreConfig, SwapStoreKind, STATE_DIR,
};
pub use context::{
    ContextStore, GenericProjectContext, GenericProjectContextFactory, ProjectContext,
    ProjectContextFactory, ProjectScope,
};
#[cfg(feature = "postgres")]
pub use context::{PostgresProjectContext, PostgresProjectContextFactory};
pub use db::{state_of, DbStore, ProjectRecord, ProjectState, RedbStore};
#[cfg(feature = "postgres")]
pub use db::{PostgresConnectionPool, PostgresOptions, PostgresStore};
pub use error::{BridgeError, ErrorCategory, Result};
pub use lock::{DrainWaiter, InProcessLock, LockRegistry, OperationTracker, ProjectLock};
#[cfg(feature = "postgres")]
pub use lock::PostgresLock;
pub use repo_store::{validate_project_name, ArchiveStream, FsRepoStore, GcReport, RepoStore};
pub use services::Services;
pub use storage_lock::StorageLock;
pub use swap::{
    CompressionMethod, NoopSwapJob, SwapJob, SwapJobImpl, SwapReport, SwapSettings, GIB,
    MAX_SKIPS_PER_RUN,
};
pub use swap_store::{DirSwapStore, InMemorySwapStore, SwapStore};

use std::time::{SystemTime, UNIX_EPOCH};

/// Time provider trait for testing.
///
/// Allows injecting controlled time into stores and the swap job so that
/// `last_accessed` ordering is deterministic in tests.
pub trait TimeProvider: Send + Sync {
    /// Returns the current Unix timestamp in milliseconds.
    fn now(&self) -> i64;
}

impl<F> TimeProvider for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now(&self) -> i64 {
        self()
    }
}

/// Returns the current Unix timestamp in milliseconds.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
