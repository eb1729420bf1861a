//! The watermark-driven swap job.

use super::{CompressionMethod, SwapJob};
use crate::config::SwapConfig;
use crate::context::{ContextStore, ProjectContext};
use crate::db::{DbStore, ProjectState};
use crate::error::{BridgeError, Result};
use crate::repo_store::RepoStore;
use crate::swap_store::SwapStore;
use crate::{unix_millis, TimeProvider};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Bytes per GiB.
pub const GIB: u64 = 1 << 30;

/// Failed evictions tolerated in one run before the run gives up.
pub const MAX_SKIPS_PER_RUN: usize = 20;

/// Swap job settings in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapSettings {
    /// Never evict below this many resident projects.
    pub min_projects: usize,
    /// Evict until usage is at or below this.
    pub low_watermark_bytes: u64,
    /// Runs do nothing while usage is below this.
    pub high_watermark_bytes: u64,
    /// Delay between the end of one run and the start of the next.
    pub interval: Duration,
    /// Codec for new archives.
    pub compression_method: CompressionMethod,
}

impl SwapSettings {
    /// Converts the configured GiB values to bytes.
    pub fn from_config(config: &SwapConfig) -> Self {
        Self {
            min_projects: config.min_projects,
            low_watermark_bytes: config.low_gib.saturating_mul(GIB),
            high_watermark_bytes: config.high_gib.saturating_mul(GIB),
            interval: Duration::from_millis(config.interval_millis),
            compression_method: CompressionMethod::from_config(&config.compression_method),
        }
    }
}

/// Outcome of one swap run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    /// Disk usage when the run started.
    pub initial_size: u64,
    /// Disk usage when the run ended.
    pub final_size: u64,
    /// Projects evicted, in eviction order.
    pub evicted: Vec<String>,
    /// Projects whose eviction failed, one entry per failure.
    pub skipped: Vec<String>,
    /// Resident projects when the run ended.
    pub resident_projects: usize,
    /// All project rows when the run ended.
    pub total_projects: usize,
    /// True if the run stopped early after too many failures or on shutdown.
    pub aborted: bool,
}

struct Inner {
    settings: SwapSettings,
    context_store: Arc<ContextStore>,
    repo_store: Arc<dyn RepoStore>,
    db_store: Arc<dyn DbStore>,
    swap_store: Arc<dyn SwapStore>,
    runs: AtomicU64,
    time_provider: Option<Arc<dyn TimeProvider>>,
}

struct Timer {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// [`SwapJob`] that evicts least-recently-used projects between watermarks.
///
/// Each run measures disk usage; above the high watermark it evicts the
/// oldest resident project, under that project's lock, until usage is at or
/// below the low watermark or only `min_projects` remain resident. A project
/// whose eviction fails has its `last_accessed` touched so the next pick is
/// a different project, and after [`MAX_SKIPS_PER_RUN`] failures the run
/// gives up until the next scheduled one.
pub struct SwapJobImpl {
    inner: Arc<Inner>,
    timer: Mutex<Option<Timer>>,
}

impl SwapJobImpl {
    /// Creates a stopped job.
    pub fn new(
        settings: SwapSettings,
        context_store: Arc<ContextStore>,
        repo_store: Arc<dyn RepoStore>,
        db_store: Arc<dyn DbStore>,
        swap_store: Arc<dyn SwapStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                context_store,
                repo_store,
                db_store,
                swap_store,
                runs: AtomicU64::new(0),
                time_provider: None,
            }),
            timer: Mutex::new(None),
        }
    }

    /// Injects a clock returning Unix milliseconds. Call before `start`.
    pub fn with_time_provider(mut self, provider: impl TimeProvider + 'static) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.time_provider = Some(Arc::new(provider));
        }
        self
    }
}

impl SwapJob for SwapJobImpl {
    fn start(&self) -> Result<()> {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            warn!("Swap job already started");
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("swap-job".to_string())
            .spawn(move || loop {
                inner.run_logged();
                match stop_rx.recv_timeout(inner.settings.interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!(
            interval_ms = self.inner.settings.interval.as_millis() as u64,
            "Started swap job"
        );
        *timer = Some(Timer { stop_tx, handle });
        Ok(())
    }

    fn stop(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            let _ = timer.stop_tx.send(());
            if timer.handle.join().is_err() {
                error!("Swap job thread panicked");
            }
            info!("Stopped swap job");
        }
    }

    fn evict(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        self.inner.evict(ctx)
    }

    fn restore(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        self.inner.restore(ctx)
    }

    fn restore_if_swapped(&self, ctx: &mut dyn ProjectContext) -> Result<ProjectState> {
        match self.inner.db_store.get_project_state(ctx)? {
            ProjectState::Swapped => {
                self.inner.restore(ctx)?;
                Ok(ProjectState::Present)
            }
            state => Ok(state),
        }
    }

    fn run_once(&self) -> Result<SwapReport> {
        self.inner.run_once()
    }

    fn settings(&self) -> Option<&SwapSettings> {
        Some(&self.inner.settings)
    }

    fn runs_completed(&self) -> u64 {
        self.inner.runs.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for SwapJobImpl {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn now(&self) -> i64 {
        match &self.time_provider {
            Some(provider) => provider.now(),
            None => unix_millis(),
        }
    }

    /// One timer tick. Errors and panics are logged so the timer keeps going.
    fn run_logged(&self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_once())) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Error during swap job"),
            Err(_) => error!("Swap job run panicked"),
        }
    }

    fn run_once(&self) -> Result<SwapReport> {
        let low = self.settings.low_watermark_bytes;
        let high = self.settings.high_watermark_bytes;
        let min_projects = self.settings.min_projects;

        info!(run = self.runs.load(Ordering::SeqCst) + 1, "Running swap");
        let mut total_size = self.repo_store.total_size()?;
        let mut report = SwapReport {
            initial_size: total_size,
            ..Default::default()
        };
        info!("Size is {}/{} (high)", total_size, high);

        let mut resident = self.db_store.get_num_unswapped_projects()?;
        if total_size < high {
            info!("No need to swap");
        } else {
            loop {
                total_size = self.repo_store.total_size()?;
                resident = self.db_store.get_num_unswapped_projects()?;
                if total_size <= low || resident <= min_projects {
                    break;
                }
                if report.skipped.len() >= MAX_SKIPS_PER_RUN {
                    error!(
                        skipped = ?report.skipped,
                        "Too many errors while running swap, giving up on this run"
                    );
                    report.aborted = true;
                    break;
                }
                let Some(victim) = self.db_store.get_oldest_unswapped_project()? else {
                    break;
                };

                match self
                    .context_store
                    .in_context_with_lock(&victim, |scope| self.evict(scope.context()))
                {
                    Ok(()) => report.evicted.push(victim),
                    Err(BridgeError::ShuttingDown) => {
                        warn!("Shutting down, stopping swap run");
                        report.aborted = true;
                        break;
                    }
                    Err(e) => {
                        warn!(project = %victim, error = %e, "Error while swapping, mark project and move on");
                        self.demote(&victim);
                        report.skipped.push(victim);
                    }
                }
            }
            if total_size > low {
                warn!("Finished swapping, but total size is still too high");
            }
        }

        report.final_size = total_size;
        report.resident_projects = resident;
        report.total_projects = self.db_store.get_num_projects()?;
        info!(
            "Size: {}/{} (low), {} (high), projects on disk: {}/{}, min projects on disk: {}",
            total_size,
            low,
            high,
            resident,
            report.total_projects,
            min_projects
        );
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(report)
    }

    /// Touches `last_accessed` so the next pick is a different project.
    ///
    /// Runs in a fresh context: the failed eviction's context has already
    /// been released, and for transactional backends rolled back.
    fn demote(&self, project_name: &str) {
        let now = self.now();
        let touched = self.context_store.in_context_with_lock(project_name, |scope| {
            self.db_store
                .set_last_accessed_time(scope.context(), Some(now))
        });
        if let Err(e) = touched {
            warn!(project = %project_name, error = %e, "Failed to mark project after swap error");
        }
    }

    fn evict(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        ctx.ensure_locked()?;
        let project_name = ctx.project_name().to_string();
        let state = self.db_store.get_project_state(ctx)?;
        if state != ProjectState::Present {
            return Err(BridgeError::NotResident {
                project: project_name,
                state,
            });
        }
        info!(project = %project_name, "Evicting project");

        if let Err(e) = self.repo_store.gc_project(&project_name) {
            error!(project = %project_name, error = %e, "Error while running gc on project");
        }

        let method = self.settings.compression_method;
        let mut archive = match method {
            CompressionMethod::Gzip => self.repo_store.gzip_project(&project_name)?,
            CompressionMethod::Bzip2 => self.repo_store.bzip2_project(&project_name)?,
        };
        self.swap_store
            .upload(&project_name, &mut archive.reader, archive.size)?;
        self.db_store.swap(ctx, method.as_str())?;

        // The swapped state is recorded and the remote copy is safe, so a
        // failed delete only leaves stale bytes for the next attempt.
        if let Err(e) = self.repo_store.remove(&project_name) {
            warn!(project = %project_name, error = %e, "Evicted project but failed to remove local copy");
        }
        info!(project = %project_name, size = archive.size, "Evicted project");
        Ok(())
    }

    fn restore(&self, ctx: &mut dyn ProjectContext) -> Result<()> {
        ctx.ensure_locked()?;
        let project_name = ctx.project_name().to_string();
        info!(project = %project_name, "Restoring project");

        let recorded = self
            .db_store
            .get_swap_compression(ctx)?
            .ok_or_else(|| BridgeError::MissingSwapCompression(project_name.clone()))?;
        let method = CompressionMethod::from_name(&recorded).ok_or_else(|| {
            BridgeError::UnknownCompression {
                project: project_name.clone(),
                method: recorded.clone(),
            }
        })?;

        let mut stream = self.swap_store.open_download_stream(&project_name)?;
        match method {
            CompressionMethod::Gzip => self.repo_store.ungzip_project(&project_name, &mut stream)?,
            CompressionMethod::Bzip2 => {
                self.repo_store.unbzip2_project(&project_name, &mut stream)?
            }
        }
        self.db_store.restore(ctx)?;

        if let Err(e) = self.swap_store.remove(&project_name) {
            warn!(project = %project_name, error = %e, "Restored project but failed to remove swapped copy");
        }
        info!(project = %project_name, "Restored project");
        Ok(())
    }
}
