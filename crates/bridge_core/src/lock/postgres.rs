//! Row locks in a shared postgres database.

use super::{OperationTracker, ProjectLock};
use crate::db::{db_err, PostgresConnectionPool};
use crate::error::{BridgeError, Result};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};

/// SQLSTATE `lock_not_available`, raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Server-side bound on waiting for another holder's row lock.
const LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '59999ms'";

/// [`ProjectLock`] backed by `SELECT ... FOR UPDATE` on the project's row.
///
/// `lock` checks out a pooled connection, opens a transaction and locks the
/// row, inserting a placeholder row first if the project has none. The
/// transaction stays open until the outermost `unlock`, which commits if
/// [`ProjectLock::success`] was called and rolls back otherwise. Nested
/// `lock` calls on the same object only count depth.
pub struct PostgresLock {
    project_name: String,
    pool: PostgresConnectionPool,
    tracker: Arc<OperationTracker>,
    transaction: Option<Transaction<'static, Postgres>>,
    depth: usize,
    succeeded: bool,
}

impl PostgresLock {
    /// Creates an unlocked lock object. No connection is taken yet.
    pub fn new(
        project_name: &str,
        pool: PostgresConnectionPool,
        tracker: Arc<OperationTracker>,
    ) -> Self {
        Self {
            project_name: project_name.to_string(),
            pool,
            tracker,
            transaction: None,
            depth: 0,
            succeeded: false,
        }
    }

    /// The transaction holding the row lock, while locked.
    pub fn transaction(&mut self) -> Option<&mut Transaction<'static, Postgres>> {
        self.transaction.as_mut()
    }

    /// The pool this lock checks connections out of.
    pub fn pool(&self) -> &PostgresConnectionPool {
        &self.pool
    }

    fn acquire(&self) -> Result<Transaction<'static, Postgres>> {
        let name = self.project_name.clone();
        self.pool.block_on(async {
            let mut tx = self
                .pool
                .pool()
                .begin()
                .await
                .map_err(|e| db_err("Failed to begin transaction", e))?;
            let locked = async {
                sqlx::query(LOCK_TIMEOUT).execute(&mut *tx).await?;
                sqlx::query(
                    "INSERT INTO projects (name, version_id, last_accessed) VALUES ($1, 0, NULL) \
                     ON CONFLICT (name) DO NOTHING",
                )
                .bind(&name)
                .execute(&mut *tx)
                .await?;
                sqlx::query("SELECT name FROM projects WHERE name = $1 FOR UPDATE")
                    .bind(&name)
                    .execute(&mut *tx)
                    .await?;
                Ok::<(), sqlx::Error>(())
            }
            .await;

            match locked {
                Ok(()) => Ok(tx),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(project = %name, error = %rollback, "Rollback after failed lock");
                    }
                    Err(map_lock_error(&name, e))
                }
            }
        })
    }

    fn finish(&mut self, tx: Transaction<'static, Postgres>) -> Result<()> {
        let commit = self.succeeded;
        self.succeeded = false;
        let outcome = self.pool.block_on(async move {
            if commit {
                tx.commit().await
            } else {
                tx.rollback().await
            }
        });
        self.tracker.register_end();
        match outcome {
            Ok(()) => {
                debug!(project = %self.project_name, commit, "Released row lock");
                Ok(())
            }
            Err(e) => Err(db_err(
                if commit { "Commit failed" } else { "Rollback failed" },
                e,
            )),
        }
    }
}

fn map_lock_error(project_name: &str, e: sqlx::Error) -> BridgeError {
    let busy = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == LOCK_NOT_AVAILABLE);
    if busy {
        BridgeError::LockBusy {
            project: project_name.to_string(),
        }
    } else {
        db_err("Failed to lock project row", e)
    }
}

impl ProjectLock for PostgresLock {
    fn project_name(&self) -> &str {
        &self.project_name
    }

    fn lock(&mut self) -> Result<()> {
        if self.depth > 0 {
            self.depth += 1;
            return Ok(());
        }
        self.tracker.register_start()?;
        debug!(project = %self.project_name, "Trying to get row lock");
        match self.acquire() {
            Ok(tx) => {
                self.transaction = Some(tx);
                self.depth = 1;
                self.succeeded = false;
                debug!(project = %self.project_name, "Got row lock");
                Ok(())
            }
            Err(e) => {
                self.tracker.register_end();
                Err(e)
            }
        }
    }

    fn unlock(&mut self) -> Result<()> {
        match self.depth {
            0 => Ok(()),
            1 => {
                self.depth = 0;
                match self.transaction.take() {
                    Some(tx) => self.finish(tx),
                    None => {
                        self.tracker.register_end();
                        Ok(())
                    }
                }
            }
            _ => {
                self.depth -= 1;
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.depth > 1 {
            self.depth = 1;
        }
        self.unlock()
    }

    fn success(&mut self) {
        self.succeeded = true;
    }

    fn is_locked(&self) -> bool {
        self.depth > 0
    }
}

impl Drop for PostgresLock {
    fn drop(&mut self) {
        if let Some(tx) = self.transaction.take() {
            warn!(project = %self.project_name, "Dropped a held row lock, rolling back");
            self.succeeded = false;
            if let Err(e) = self.finish(tx) {
                warn!(project = %self.project_name, error = %e, "Rollback on drop failed");
            }
        }
    }
}
