//! Eviction of cold projects to swap storage, and restore on demand.

mod job;

pub use job::{SwapJobImpl, SwapReport, SwapSettings, GIB, MAX_SKIPS_PER_RUN};

use crate::context::ProjectContext;
use crate::db::{DbStore, ProjectState};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Codec used for a swapped project's archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// tar + gzip
    Gzip,
    /// tar + bzip2
    #[default]
    Bzip2,
}

impl CompressionMethod {
    /// Name recorded in the backing store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
        }
    }

    /// Parses a recorded name. Returns `None` for anything unrecognized.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gzip" => Some(Self::Gzip),
            "bzip2" => Some(Self::Bzip2),
            _ => None,
        }
    }

    /// Parses a configured name, falling back to bzip2 with a warning.
    pub fn from_config(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            warn!(method = %name, "Unsupported compression method, defaulting to bzip2");
            Self::Bzip2
        })
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background eviction plus the evict/restore primitives it is built from.
///
/// `evict` and `restore` expect the project's lock to be held by `ctx`;
/// restore may be called from inside any operation that already holds it.
pub trait SwapJob: Send + Sync {
    /// Starts the periodic job. The first run fires immediately.
    fn start(&self) -> Result<()>;

    /// Stops the periodic job, waiting for an in-progress run to finish.
    fn stop(&self);

    /// Moves the project's repository to swap storage.
    fn evict(&self, ctx: &mut dyn ProjectContext) -> Result<()>;

    /// Brings a swapped project's repository back to local disk.
    fn restore(&self, ctx: &mut dyn ProjectContext) -> Result<()>;

    /// Restores the context's project if it is swapped out.
    ///
    /// Call this from an operation that already holds the project's lock and
    /// needs the repository on disk. Returns the state after any restore.
    fn restore_if_swapped(&self, ctx: &mut dyn ProjectContext) -> Result<ProjectState>;

    /// Runs one pass synchronously.
    fn run_once(&self) -> Result<SwapReport>;

    /// Watermark settings, or `None` when swapping is not configured.
    fn settings(&self) -> Option<&SwapSettings>;

    /// Number of runs that completed, with or without evicting anything.
    fn runs_completed(&self) -> u64;

    /// True while the periodic timer is running.
    fn is_running(&self) -> bool;
}

/// [`SwapJob`] used when swapping is not configured.
///
/// Nothing is ever evicted. A project left swapped by an earlier
/// configuration can't be restored and reports an error instead.
pub struct NoopSwapJob {
    db_store: Arc<dyn DbStore>,
}

impl NoopSwapJob {
    /// Creates a job that reads project state from `db_store`.
    pub fn new(db_store: Arc<dyn DbStore>) -> Self {
        Self { db_store }
    }
}

fn not_configured(what: &str) -> BridgeError {
    BridgeError::ConfigError(format!("cannot {what}: swap is not configured"))
}

impl SwapJob for NoopSwapJob {
    fn start(&self) -> Result<()> {
        info!("Swap not configured, nothing to start");
        Ok(())
    }

    fn stop(&self) {}

    fn evict(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        Err(not_configured(&format!("evict {}", ctx.project_name())))
    }

    fn restore(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        Err(not_configured(&format!("restore {}", ctx.project_name())))
    }

    fn restore_if_swapped(&self, ctx: &mut dyn ProjectContext) -> Result<ProjectState> {
        match self.db_store.get_project_state(ctx)? {
            ProjectState::Swapped => self.restore(ctx).map(|()| ProjectState::Present),
            state => Ok(state),
        }
    }

    fn run_once(&self) -> Result<SwapReport> {
        Err(not_configured("run a swap pass"))
    }

    fn settings(&self) -> Option<&SwapSettings> {
        None
    }

    fn runs_completed(&self) -> u64 {
        0
    }

    fn is_running(&self) -> bool {
        false
    }
}
