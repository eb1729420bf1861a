//! Shared postgres backing store.
//!
//! sqlx is async; the rest of the crate is not. A [`PostgresConnectionPool`]
//! owns a small private tokio runtime and every query is driven to completion
//! with `block_on` from the calling thread.

use super::{state_of, DbStore, ProjectRecord, ProjectState};
use crate::config::{DatabaseConfig, PoolSettings};
use crate::context::{PostgresProjectContext, ProjectContext};
use crate::error::{BridgeError, Result};
use crate::{unix_millis, TimeProvider};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::{EnterGuard, Runtime};
use tracing::{error, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    name             TEXT PRIMARY KEY,
    version_id       BIGINT NOT NULL DEFAULT 0,
    last_accessed    TIMESTAMPTZ NULL,
    swap_compression TEXT NULL,
    swap_time        TIMESTAMPTZ NULL,
    restore_time     TIMESTAMPTZ NULL
)";

type RecordRow = (
    i64,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

const SELECT_RECORD: &str = "SELECT version_id, last_accessed, swap_compression, swap_time, restore_time \
     FROM projects WHERE name = $1";

/// Connection settings for the postgres backend.
#[derive(Clone)]
pub struct PostgresOptions {
    /// Connection URL.
    pub url: String,
    /// User, overriding any in the URL.
    pub username: Option<String>,
    /// Password, overriding any in the URL.
    pub password: Option<String>,
    /// Pool sizing.
    pub pool: PoolSettings,
}

impl PostgresOptions {
    /// Builds options from the `[database]` section.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BridgeError::ConfigError("database.url is required".into()))?;
        let pool = config.pool();
        if pool.max_total < pool.initial_size {
            return Err(BridgeError::ConfigError(format!(
                "Invalid pool_max_total and pool_initial_size: {}, {}",
                pool.max_total, pool.initial_size
            )));
        }
        Ok(Self {
            url,
            username: config.username.clone(),
            password: config.password.clone(),
            pool,
        })
    }
}

impl fmt::Debug for PostgresOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresOptions")
            .field("url", &"<REDACTED>")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

pub(crate) fn db_err(context: &str, e: sqlx::Error) -> BridgeError {
    BridgeError::Database(format!("{}: {}", context, e))
}

/// A sqlx pool plus the runtime that drives it. Cheap to clone.
#[derive(Clone)]
pub struct PostgresConnectionPool {
    runtime: Arc<Runtime>,
    pool: PgPool,
}

impl PostgresConnectionPool {
    /// Opens the pool, establishing `initial_size` connections.
    pub fn connect(options: &PostgresOptions) -> Result<Self> {
        info!(options = ?options, "Initialize postgres connection pool");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bridge-postgres")
            .enable_all()
            .build()?;

        let mut connect = PgConnectOptions::from_str(&options.url)
            .map_err(|e| db_err("Invalid postgres url", e))?;
        if let Some(username) = &options.username {
            connect = connect.username(username);
        }
        if let Some(password) = &options.password {
            connect = connect.password(password);
        }

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .min_connections(options.pool.initial_size)
                    .max_connections(options.pool.max_total)
                    .acquire_timeout(options.pool.max_wait)
                    .connect_with(connect),
            )
            .map_err(|e| {
                error!(error = %e, "Error connecting to postgres");
                db_err("Error connecting to postgres", e)
            })?;

        Ok(Self {
            runtime: Arc::new(runtime),
            pool,
        })
    }

    /// Drives `future` to completion on the pool's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Enters the runtime so sqlx handles can be dropped from sync code.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    /// The underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes every connection. Further checkouts fail.
    pub fn close(&self) {
        info!("Closing postgres connection pool");
        self.block_on(self.pool.close());
    }
}

fn to_timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| BridgeError::Database(format!("timestamp out of range: {}", millis)))
}

fn to_record(row: RecordRow) -> ProjectRecord {
    let (version, last_accessed, swap_compression, swap_time, restore_time) = row;
    ProjectRecord {
        version,
        last_accessed: last_accessed.map(|t| t.timestamp_millis()),
        swap_compression,
        swap_time: swap_time.map(|t| t.timestamp_millis()),
        restore_time: restore_time.map(|t| t.timestamp_millis()),
    }
}

/// [`DbStore`] over a shared postgres database.
///
/// Per-project methods run on the transaction held by the context's
/// [`PostgresLock`](crate::PostgresLock), so they see and extend the row lock
/// instead of waiting on it, and commit or roll back with the operation.
pub struct PostgresStore {
    pool: PostgresConnectionPool,
    time_provider: Option<Arc<dyn TimeProvider>>,
}

impl PostgresStore {
    /// Creates a store over `pool`.
    pub fn new(pool: PostgresConnectionPool) -> Self {
        info!("Initialize postgres project store");
        Self {
            pool,
            time_provider: None,
        }
    }

    /// Injects a clock returning Unix milliseconds.
    pub fn with_time_provider(mut self, provider: impl TimeProvider + 'static) -> Self {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    /// Creates the `projects` table if it doesn't exist.
    pub fn initialize_schema(&self) -> Result<()> {
        self.pool
            .block_on(sqlx::query(SCHEMA).execute(self.pool.pool()))
            .map_err(|e| db_err("Failed to create schema", e))?;
        Ok(())
    }

    fn now(&self) -> Result<DateTime<Utc>> {
        to_timestamp(match &self.time_provider {
            Some(provider) => provider.now(),
            None => unix_millis(),
        })
    }

    /// The postgres context behind `ctx`, checked to hold its lock.
    fn postgres_context<'c>(
        ctx: &'c mut dyn ProjectContext,
    ) -> Result<&'c mut PostgresProjectContext> {
        ctx.ensure_locked()?;
        let name = ctx.project_name().to_string();
        ctx.as_any_mut()
            .downcast_mut::<PostgresProjectContext>()
            .ok_or_else(|| {
                BridgeError::Database(format!(
                    "project {} was not opened with a postgres context",
                    name
                ))
            })
    }

    /// Runs a statement that takes `(name, ...)` on the context's transaction.
    fn execute_locked<'q>(
        &self,
        ctx: &mut dyn ProjectContext,
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        what: &str,
    ) -> Result<u64> {
        let pg = Self::postgres_context(ctx)?;
        let tx = pg.transaction()?;
        let done = self
            .pool
            .block_on(query.execute(&mut **tx))
            .map_err(|e| db_err(what, e))?;
        Ok(done.rows_affected())
    }

    fn read_locked(&self, ctx: &mut dyn ProjectContext) -> Result<Option<ProjectRecord>> {
        let pg = Self::postgres_context(ctx)?;
        let name = pg.project_name().to_string();
        let tx = pg.transaction()?;
        let row: Option<RecordRow> = self
            .pool
            .block_on(
                sqlx::query_as(SELECT_RECORD)
                    .bind(&name)
                    .fetch_optional(&mut **tx),
            )
            .map_err(|e| db_err("Failed to read project", e))?;
        Ok(row.map(to_record))
    }

    fn scalar_count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self
            .pool
            .block_on(sqlx::query_scalar(sql).fetch_one(self.pool.pool()))
            .map_err(|e| db_err("Postgres query error", e))?;
        Ok(count.max(0) as usize)
    }
}

impl DbStore for PostgresStore {
    fn get_num_projects(&self) -> Result<usize> {
        self.scalar_count("SELECT count(*) FROM projects")
    }

    fn get_project_names(&self) -> Result<Vec<String>> {
        self.pool
            .block_on(
                sqlx::query_scalar("SELECT name FROM projects ORDER BY name")
                    .fetch_all(self.pool.pool()),
            )
            .map_err(|e| db_err("Postgres query error", e))
    }

    fn get_project(&self, project_name: &str) -> Result<Option<ProjectRecord>> {
        let row: Option<RecordRow> = self
            .pool
            .block_on(
                sqlx::query_as(SELECT_RECORD)
                    .bind(project_name)
                    .fetch_optional(self.pool.pool()),
            )
            .map_err(|e| db_err("Postgres query error", e))?;
        Ok(row.map(to_record))
    }

    fn set_latest_version_for_project(
        &self,
        ctx: &mut dyn ProjectContext,
        version: i64,
    ) -> Result<()> {
        let name = ctx.project_name().to_string();
        let query = sqlx::query(
            "INSERT INTO projects (name, version_id, last_accessed) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE \
             SET version_id = EXCLUDED.version_id, last_accessed = EXCLUDED.last_accessed",
        )
        .bind(name)
        .bind(version)
        .bind(self.now()?);
        self.execute_locked(ctx, query, "Failed to set version")?;
        Ok(())
    }

    fn get_latest_version_for_project(&self, ctx: &mut dyn ProjectContext) -> Result<i64> {
        Ok(self.read_locked(ctx)?.map_or(0, |record| record.version))
    }

    fn get_project_state(&self, ctx: &mut dyn ProjectContext) -> Result<ProjectState> {
        Ok(state_of(self.read_locked(ctx)?.as_ref()))
    }

    fn set_last_accessed_time(
        &self,
        ctx: &mut dyn ProjectContext,
        time: Option<i64>,
    ) -> Result<()> {
        let name = ctx.project_name().to_string();
        let time = time.map(to_timestamp).transpose()?;
        let query = sqlx::query("UPDATE projects SET last_accessed = $2 WHERE name = $1")
            .bind(name)
            .bind(time);
        self.execute_locked(ctx, query, "Failed to set last accessed time")?;
        Ok(())
    }

    fn swap(&self, ctx: &mut dyn ProjectContext, compression_method: &str) -> Result<()> {
        let name = ctx.project_name().to_string();
        let query = sqlx::query(
            "UPDATE projects SET last_accessed = NULL, swap_compression = $2, swap_time = $3 \
             WHERE name = $1 AND version_id > 0",
        )
        .bind(name.clone())
        .bind(compression_method.to_string())
        .bind(self.now()?);
        match self.execute_locked(ctx, query, "Failed to record swap")? {
            0 => Err(BridgeError::ProjectNotRecorded(name)),
            _ => Ok(()),
        }
    }

    fn restore(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        let name = ctx.project_name().to_string();
        let query = sqlx::query(
            "UPDATE projects SET last_accessed = $2, swap_compression = NULL, restore_time = $2 \
             WHERE name = $1 AND version_id > 0",
        )
        .bind(name.clone())
        .bind(self.now()?);
        match self.execute_locked(ctx, query, "Failed to record restore")? {
            0 => Err(BridgeError::ProjectNotRecorded(name)),
            _ => Ok(()),
        }
    }

    fn get_swap_compression(&self, ctx: &mut dyn ProjectContext) -> Result<Option<String>> {
        Ok(self
            .read_locked(ctx)?
            .and_then(|record| record.swap_compression))
    }

    fn get_oldest_unswapped_project(&self) -> Result<Option<String>> {
        self.pool
            .block_on(
                sqlx::query_scalar(
                    "SELECT name FROM projects \
                     WHERE version_id > 0 AND last_accessed IS NOT NULL \
                     ORDER BY last_accessed ASC, name ASC LIMIT 1",
                )
                .fetch_optional(self.pool.pool()),
            )
            .map_err(|e| db_err("Postgres query error", e))
    }

    fn get_num_unswapped_projects(&self) -> Result<usize> {
        self.scalar_count(
            "SELECT count(*) FROM projects WHERE version_id > 0 AND last_accessed IS NOT NULL",
        )
    }
}
