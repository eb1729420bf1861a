//! Backing store for project rows.
//!
//! A project row records the latest snapshot version mirrored locally and
//! whether the on-disk repository is present or swapped out. Version 0 marks
//! a placeholder row: one created because a lock was taken on a name that
//! may not exist remotely yet. Placeholders read as [`ProjectState::NotPresent`].

#[cfg(feature = "postgres")]
mod postgres;
mod redb_store;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnectionPool, PostgresOptions, PostgresStore};
#[cfg(feature = "postgres")]
pub(crate) use postgres::db_err;
pub use redb_store::RedbStore;

use crate::context::ProjectContext;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a project's repository is on local disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// No row, or a placeholder row with version 0.
    NotPresent,
    /// Real version recorded and the repository is on disk.
    Present,
    /// Real version recorded and the repository lives in swap storage.
    Swapped,
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotPresent => "not present",
            Self::Present => "present",
            Self::Swapped => "swapped",
        };
        f.write_str(s)
    }
}

/// A project's persisted row. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Latest mirrored version; 0 for a placeholder.
    pub version: i64,
    /// Last time the project was used; `None` once swapped out.
    pub last_accessed: Option<i64>,
    /// Codec used for the current swapped copy.
    pub swap_compression: Option<String>,
    /// When the project was last swapped out.
    pub swap_time: Option<i64>,
    /// When the project was last restored.
    pub restore_time: Option<i64>,
}

impl ProjectRecord {
    /// A fresh placeholder row.
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// Derives the presence state from the row.
    pub fn state(&self) -> ProjectState {
        match (self.version, self.last_accessed) {
            (v, _) if v <= 0 => ProjectState::NotPresent,
            (_, Some(_)) => ProjectState::Present,
            (_, None) => ProjectState::Swapped,
        }
    }

    /// True when the row counts as disk-resident.
    pub fn is_resident(&self) -> bool {
        self.state() == ProjectState::Present
    }
}

/// Derives a state from an optional row.
pub fn state_of(record: Option<&ProjectRecord>) -> ProjectState {
    record.map_or(ProjectState::NotPresent, ProjectRecord::state)
}

/// Persistent project metadata.
///
/// Methods that read or write one project's row take that project's locked
/// context; the project name comes from the context and an unlocked context
/// is rejected with `ContextNotLocked`. Global queries take `&self` only.
pub trait DbStore: Send + Sync {
    /// Number of project rows, placeholders included.
    fn get_num_projects(&self) -> Result<usize>;

    /// Names of all project rows, sorted.
    fn get_project_names(&self) -> Result<Vec<String>>;

    /// Unlocked snapshot of one row, for reporting.
    fn get_project(&self, project_name: &str) -> Result<Option<ProjectRecord>>;

    /// Records `version` as the latest and marks the project accessed now.
    fn set_latest_version_for_project(
        &self,
        ctx: &mut dyn ProjectContext,
        version: i64,
    ) -> Result<()>;

    /// Latest recorded version, or 0 if there is no row.
    fn get_latest_version_for_project(&self, ctx: &mut dyn ProjectContext) -> Result<i64>;

    /// Presence state of the context's project.
    fn get_project_state(&self, ctx: &mut dyn ProjectContext) -> Result<ProjectState>;

    /// Sets or clears `last_accessed`. A missing row is left missing.
    fn set_last_accessed_time(
        &self,
        ctx: &mut dyn ProjectContext,
        time: Option<i64>,
    ) -> Result<()>;

    /// Marks the project swapped out with `compression_method`.
    ///
    /// Fails with [`BridgeError::ProjectNotRecorded`] unless the row holds a
    /// real version, so a caller never deletes local data the store does not
    /// know was swapped.
    ///
    /// [`BridgeError::ProjectNotRecorded`]: crate::BridgeError::ProjectNotRecorded
    fn swap(&self, ctx: &mut dyn ProjectContext, compression_method: &str) -> Result<()>;

    /// Marks the project present again and clears its compression method.
    /// Fails like [`DbStore::swap`] when there is no recorded version.
    fn restore(&self, ctx: &mut dyn ProjectContext) -> Result<()>;

    /// Codec recorded for the project's swapped copy.
    fn get_swap_compression(&self, ctx: &mut dyn ProjectContext) -> Result<Option<String>>;

    /// Least recently used resident project.
    fn get_oldest_unswapped_project(&self) -> Result<Option<String>>;

    /// Number of resident projects.
    fn get_num_unswapped_projects(&self) -> Result<usize>;
}
