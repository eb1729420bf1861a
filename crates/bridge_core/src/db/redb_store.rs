//! Embedded single-file backing store.

use super::{DbStore, ProjectRecord, ProjectState};
use crate::context::ProjectContext;
use crate::error::{BridgeError, Result};
use crate::{unix_millis, TimeProvider};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Database schema version for migration support.
pub const DB_SCHEMA_VERSION: u32 = 1;

const METADATA_TABLE: TableDefinition<&str, u32> = TableDefinition::new("metadata");
const PROJECTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");

/// [`DbStore`] backed by a redb file.
///
/// redb serializes write transactions itself, so this store needs no row
/// locking of its own; pair it with the in-process lock variant. Rows are
/// postcard-encoded [`ProjectRecord`]s keyed by project name.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
    time_provider: Option<Arc<dyn TimeProvider>>,
}

impl RedbStore {
    /// Opens the database at `path`, creating it and its parent directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be opened or was written by a
    /// different schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Opening embedded project store");
        let db = Database::create(&path)
            .map_err(|e| BridgeError::Database(format!("Failed to open database: {}", e)))?;
        let store = Self {
            db,
            path,
            time_provider: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Injects a clock returning Unix milliseconds.
    pub fn with_time_provider(mut self, provider: impl TimeProvider + 'static) -> Self {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn now(&self) -> i64 {
        match &self.time_provider {
            Some(provider) => provider.now(),
            None => unix_millis(),
        }
    }

    fn init_schema(&self) -> Result<()> {
        let write_txn = self.begin_write()?;
        {
            let mut meta = write_txn
                .open_table(METADATA_TABLE)
                .map_err(|e| BridgeError::Database(format!("Failed to open metadata table: {}", e)))?;
            let existing = meta
                .get("version")
                .map_err(|e| BridgeError::Database(format!("Failed to read version: {}", e)))?
                .map(|v| v.value());
            match existing {
                Some(version) if version != DB_SCHEMA_VERSION => {
                    return Err(BridgeError::Database(format!(
                        "Schema version mismatch: found {}, expected {}",
                        version, DB_SCHEMA_VERSION
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert("version", DB_SCHEMA_VERSION).map_err(|e| {
                        BridgeError::Database(format!("Failed to write version: {}", e))
                    })?;
                }
            }
            write_txn
                .open_table(PROJECTS_TABLE)
                .map_err(|e| BridgeError::Database(format!("Failed to open projects table: {}", e)))?;
        }
        write_txn
            .commit()
            .map_err(|e| BridgeError::Database(format!("Failed to commit: {}", e)))
    }

    fn read_record(&self, project_name: &str) -> Result<Option<ProjectRecord>> {
        let read_txn = self.begin_read()?;
        let table = read_txn
            .open_table(PROJECTS_TABLE)
            .map_err(|e| BridgeError::Database(format!("Failed to open projects table: {}", e)))?;
        let guard = table
            .get(project_name)
            .map_err(|e| BridgeError::Database(format!("Failed to read project: {}", e)))?;
        guard.map(|bytes| decode(project_name, bytes.value())).transpose()
    }

    /// Reads, transforms, and writes back one row in a single write
    /// transaction. Returning `None` from `f` leaves the table unchanged.
    fn update_record<F>(&self, project_name: &str, f: F) -> Result<()>
    where
        F: FnOnce(Option<ProjectRecord>) -> Option<ProjectRecord>,
    {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn
                .open_table(PROJECTS_TABLE)
                .map_err(|e| BridgeError::Database(format!("Failed to open projects table: {}", e)))?;
            let current = table
                .get(project_name)
                .map_err(|e| BridgeError::Database(format!("Failed to read project: {}", e)))?
                .map(|bytes| decode(project_name, bytes.value()))
                .transpose()?;
            if let Some(updated) = f(current) {
                let bytes = postcard::to_allocvec(&updated).map_err(|e| {
                    BridgeError::Database(format!("Failed to encode project {}: {}", project_name, e))
                })?;
                table
                    .insert(project_name, bytes.as_slice())
                    .map_err(|e| BridgeError::Database(format!("Failed to write project: {}", e)))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| BridgeError::Database(format!("Failed to commit: {}", e)))
    }

    /// Applies `f` to the row if `accept` allows it. Returns whether the
    /// row was written.
    fn update_existing<A, F>(&self, project_name: &str, accept: A, f: F) -> Result<bool>
    where
        A: Fn(&ProjectRecord) -> bool,
        F: FnOnce(&mut ProjectRecord),
    {
        let mut updated = false;
        self.update_record(project_name, |current| match current {
            Some(mut record) if accept(&record) => {
                f(&mut record);
                updated = true;
                Some(record)
            }
            _ => None,
        })?;
        Ok(updated)
    }

    /// Updates a row holding a real version, failing if there is none.
    fn update_recorded<F>(&self, project_name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ProjectRecord),
    {
        if self.update_existing(project_name, |record| record.version > 0, f)? {
            Ok(())
        } else {
            Err(BridgeError::ProjectNotRecorded(project_name.to_string()))
        }
    }

    fn all_records(&self) -> Result<Vec<(String, ProjectRecord)>> {
        let read_txn = self.begin_read()?;
        let table = read_txn
            .open_table(PROJECTS_TABLE)
            .map_err(|e| BridgeError::Database(format!("Failed to open projects table: {}", e)))?;
        let mut records = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| BridgeError::Database(format!("Failed to scan projects: {}", e)))?
        {
            let (name, bytes) =
                entry.map_err(|e| BridgeError::Database(format!("Failed to scan projects: {}", e)))?;
            let name = name.value().to_string();
            let record = decode(&name, bytes.value())?;
            records.push((name, record));
        }
        Ok(records)
    }

    fn begin_read(&self) -> Result<redb::ReadTransaction> {
        self.db
            .begin_read()
            .map_err(|e| BridgeError::Database(format!("Failed to begin read transaction: {}", e)))
    }

    fn begin_write(&self) -> Result<redb::WriteTransaction> {
        self.db
            .begin_write()
            .map_err(|e| BridgeError::Database(format!("Failed to begin write transaction: {}", e)))
    }
}

fn decode(project_name: &str, bytes: &[u8]) -> Result<ProjectRecord> {
    postcard::from_bytes(bytes).map_err(|e| {
        BridgeError::Database(format!("Failed to decode project {}: {}", project_name, e))
    })
}

impl DbStore for RedbStore {
    fn get_num_projects(&self) -> Result<usize> {
        let read_txn = self.begin_read()?;
        let table = read_txn
            .open_table(PROJECTS_TABLE)
            .map_err(|e| BridgeError::Database(format!("Failed to open projects table: {}", e)))?;
        let len = table
            .len()
            .map_err(|e| BridgeError::Database(format!("Failed to count projects: {}", e)))?;
        Ok(len as usize)
    }

    fn get_project_names(&self) -> Result<Vec<String>> {
        Ok(self
            .all_records()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    fn get_project(&self, project_name: &str) -> Result<Option<ProjectRecord>> {
        self.read_record(project_name)
    }

    fn set_latest_version_for_project(
        &self,
        ctx: &mut dyn ProjectContext,
        version: i64,
    ) -> Result<()> {
        ctx.ensure_locked()?;
        let now = self.now();
        debug!(project = %ctx.project_name(), version, "Setting latest version");
        self.update_record(ctx.project_name(), |current| {
            let mut record = current.unwrap_or_default();
            record.version = version;
            record.last_accessed = Some(now);
            Some(record)
        })
    }

    fn get_latest_version_for_project(&self, ctx: &mut dyn ProjectContext) -> Result<i64> {
        ctx.ensure_locked()?;
        Ok(self
            .read_record(ctx.project_name())?
            .map_or(0, |record| record.version))
    }

    fn get_project_state(&self, ctx: &mut dyn ProjectContext) -> Result<ProjectState> {
        ctx.ensure_locked()?;
        Ok(super::state_of(self.read_record(ctx.project_name())?.as_ref()))
    }

    fn set_last_accessed_time(
        &self,
        ctx: &mut dyn ProjectContext,
        time: Option<i64>,
    ) -> Result<()> {
        ctx.ensure_locked()?;
        let updated = self.update_existing(ctx.project_name(), |_| true, |record| {
            record.last_accessed = time;
        })?;
        if !updated {
            warn!(project = %ctx.project_name(), "No project row to update");
        }
        Ok(())
    }

    fn swap(&self, ctx: &mut dyn ProjectContext, compression_method: &str) -> Result<()> {
        ctx.ensure_locked()?;
        let now = self.now();
        self.update_recorded(ctx.project_name(), |record| {
            record.last_accessed = None;
            record.swap_compression = Some(compression_method.to_string());
            record.swap_time = Some(now);
        })
    }

    fn restore(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        ctx.ensure_locked()?;
        let now = self.now();
        self.update_recorded(ctx.project_name(), |record| {
            record.last_accessed = Some(now);
            record.swap_compression = None;
            record.restore_time = Some(now);
        })
    }

    fn get_swap_compression(&self, ctx: &mut dyn ProjectContext) -> Result<Option<String>> {
        ctx.ensure_locked()?;
        Ok(self
            .read_record(ctx.project_name())?
            .and_then(|record| record.swap_compression))
    }

    fn get_oldest_unswapped_project(&self) -> Result<Option<String>> {
        Ok(self
            .all_records()?
            .into_iter()
            .filter(|(_, record)| record.is_resident())
            .min_by_key(|(name, record)| (record.last_accessed, name.clone()))
            .map(|(name, _)| name))
    }

    fn get_num_unswapped_projects(&self) -> Result<usize> {
        Ok(self
            .all_records()?
            .iter()
            .filter(|(_, record)| record.is_resident())
            .count())
    }
}
