use super::assertions::Assertion;
use super::clock::MockClock;
use super::steps::ScenarioStep;
use super::workspace::TestWorkspace;
use anyhow::{anyhow, bail, ensure, Context, Result};
use bridge_core::{
    BridgeError, CompressionMethod, ContextStore, DbStore, DirSwapStore, FsRepoStore,
    GenericProjectContextFactory, ProjectState, RedbStore, RepoStore, SwapJob, SwapJobImpl,
    SwapReport, SwapSettings, SwapStore,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Swap settings for a scenario, in bytes.
#[derive(Debug, Clone)]
pub struct SwapLimits {
    pub low: u64,
    pub high: u64,
    pub min_projects: usize,
    pub compression: String,
}

impl Default for SwapLimits {
    fn default() -> Self {
        Self {
            low: 50_000,
            high: 100_000,
            min_projects: 1,
            compression: "bzip2".to_string(),
        }
    }
}

/// Live components over one workspace.
pub struct Bridge {
    pub context_store: Arc<ContextStore>,
    pub db: Arc<RedbStore>,
    pub repo: Arc<FsRepoStore>,
    pub swap_store: Arc<DirSwapStore>,
    pub job: SwapJobImpl,
}

impl Bridge {
    fn open(workspace: &TestWorkspace, limits: &SwapLimits, clock: &MockClock) -> Result<Self> {
        let repo = Arc::new(FsRepoStore::new(workspace.root())?);
        let db = Arc::new(
            RedbStore::open(workspace.database_path())?.with_time_provider(clock.as_provider()),
        );
        let swap_store = Arc::new(DirSwapStore::new(workspace.swap_dir())?);
        let context_store = Arc::new(ContextStore::new(GenericProjectContextFactory::new()));

        let settings = SwapSettings {
            min_projects: limits.min_projects,
            low_watermark_bytes: limits.low,
            high_watermark_bytes: limits.high,
            interval: Duration::from_secs(3600),
            compression_method: CompressionMethod::from_config(&limits.compression),
        };
        let job = SwapJobImpl::new(
            settings,
            context_store.clone(),
            repo.clone() as Arc<dyn RepoStore>,
            db.clone() as Arc<dyn DbStore>,
            swap_store.clone() as Arc<dyn SwapStore>,
        )
        .with_time_provider(clock.as_provider());

        Ok(Self {
            context_store,
            db,
            repo,
            swap_store,
            job,
        })
    }

    /// Current state of a project's row.
    pub fn state(&self, name: &str) -> Result<ProjectState> {
        Ok(bridge_core::state_of(self.db.get_project(name)?.as_ref()))
    }
}

/// Executes scenarios against real stores in a temp directory
pub struct ScenarioRunner {
    workspace: TestWorkspace,
    limits: SwapLimits,
    clock: MockClock,
    bridge: Option<Bridge>,
    last_report: Option<SwapReport>,
    current_step: usize,
}

impl ScenarioRunner {
    /// Create a new runner over an empty workspace
    pub fn new(limits: SwapLimits) -> Result<Self> {
        let workspace = TestWorkspace::empty()?;
        let clock = MockClock::new();
        let bridge = Bridge::open(&workspace, &limits, &clock)?;

        Ok(Self {
            workspace,
            limits,
            clock,
            bridge: Some(bridge),
            last_report: None,
            current_step: 0,
        })
    }

    /// Get current step number
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Execute all steps in sequence
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("Step {}: {:?}", i, step))?;
        }
        Ok(())
    }

    fn bridge(&self) -> Result<&Bridge> {
        self.bridge
            .as_ref()
            .ok_or_else(|| anyhow!("Bridge not available"))
    }

    /// Execute a single step
    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::CreateProject { name, size } => {
                self.workspace.create_sized_project(name, *size)
            }
            ScenarioStep::CreateProjectFromFixture { name, fixture } => {
                self.workspace.create_project_from_fixture(name, fixture)
            }
            ScenarioStep::Register { name, version } => self.handle_register(name, *version),

            ScenarioStep::Access { name } => self.handle_access(name),
            ScenarioStep::Evict { name } => self.handle_evict(name),
            ScenarioStep::Restore { name } => self.handle_restore(name),

            ScenarioStep::RunSwap => {
                let report = self.bridge()?.job.run_once()?;
                self.last_report = Some(report);
                Ok(())
            }

            ScenarioStep::Wait { duration } => {
                self.clock.advance(*duration);
                Ok(())
            }

            ScenarioStep::Shutdown => self.handle_shutdown(),
            ScenarioStep::Restart => self.handle_restart(),

            ScenarioStep::Assert { assertion } => self.handle_assertion(assertion),
        }
    }

    // ===== Operation handlers =====

    fn handle_register(&mut self, name: &str, version: i64) -> Result<()> {
        let bridge = self.bridge()?;
        bridge.context_store.in_context_with_lock(name, |scope| {
            bridge
                .db
                .set_latest_version_for_project(scope.context(), version)
        })?;
        Ok(())
    }

    fn handle_access(&mut self, name: &str) -> Result<()> {
        let bridge = self.bridge()?;
        let now = self.clock.now();
        bridge.context_store.in_context_with_lock(name, |scope| {
            let state = bridge.job.restore_if_swapped(scope.context())?;
            if state == ProjectState::NotPresent {
                return Err(anyhow!("project {} is not present", name));
            }
            bridge
                .db
                .set_last_accessed_time(scope.context(), Some(now))?;
            Ok(())
        })
    }

    fn handle_evict(&mut self, name: &str) -> Result<()> {
        let bridge = self.bridge()?;
        bridge
            .context_store
            .in_context_with_lock(name, |scope| bridge.job.evict(scope.context()))?;
        Ok(())
    }

    fn handle_restore(&mut self, name: &str) -> Result<()> {
        let bridge = self.bridge()?;
        bridge
            .context_store
            .in_context_with_lock(name, |scope| bridge.job.restore(scope.context()))?;
        Ok(())
    }

    // ===== Lifecycle handlers =====

    fn handle_shutdown(&mut self) -> Result<()> {
        let bridge = self.bridge()?;
        bridge.job.stop();
        bridge.context_store.stop();
        Ok(())
    }

    fn handle_restart(&mut self) -> Result<()> {
        if let Some(bridge) = self.bridge.take() {
            bridge.job.stop();
            bridge.context_store.stop();
        }
        self.last_report = None;
        self.bridge = Some(Bridge::open(&self.workspace, &self.limits, &self.clock)?);
        Ok(())
    }

    // ===== Assertion handler =====

    fn handle_assertion(&mut self, assertion: &Assertion) -> Result<()> {
        let bridge = self.bridge()?;
        match assertion {
            Assertion::State { name, state } => {
                let actual = bridge.state(name)?;
                ensure!(
                    actual == *state,
                    "Expected {} to be {}, got {}",
                    name,
                    state,
                    actual
                );
            }
            Assertion::Version { name, version } => {
                let record = bridge
                    .db
                    .get_project(name)?
                    .ok_or_else(|| anyhow!("No row for {}", name))?;
                ensure!(
                    record.version == *version,
                    "Expected {} at version {}, got {}",
                    name,
                    version,
                    record.version
                );
            }
            Assertion::ResidentProjects(expected) => {
                let actual = bridge.db.get_num_unswapped_projects()?;
                ensure!(
                    actual == *expected,
                    "Expected {} resident projects, got {}",
                    expected,
                    actual
                );
            }
            Assertion::OnDisk(name) => {
                ensure!(self.workspace.project_exists(name), "{} is not on disk", name);
            }
            Assertion::NotOnDisk(name) => {
                ensure!(
                    !self.workspace.project_exists(name),
                    "{} is still on disk",
                    name
                );
            }
            Assertion::DiskUsageAtMost(limit) => {
                let actual = bridge.repo.total_size()?;
                ensure!(
                    actual <= *limit,
                    "Disk usage {} exceeds {}",
                    actual,
                    limit
                );
            }
            Assertion::FileContent {
                project,
                path,
                content,
            } => {
                let actual = self.workspace.read_project_file(project, path)?;
                ensure!(
                    actual == *content,
                    "{}/{} has unexpected content",
                    project,
                    path
                );
            }
            Assertion::MatchesFixture { project, fixture } => {
                let fixture_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                    .join("fixtures")
                    .join(fixture);
                let expected = list_files(&fixture_dir)?;
                let actual = list_files(&self.workspace.root().join(project))?;
                ensure!(
                    expected.iter().map(|(p, _)| p).eq(actual.iter().map(|(p, _)| p)),
                    "File lists differ: {:?} vs {:?}",
                    expected.iter().map(|(p, _)| p).collect::<Vec<_>>(),
                    actual.iter().map(|(p, _)| p).collect::<Vec<_>>()
                );
                for ((path, want), (_, got)) in expected.iter().zip(&actual) {
                    ensure!(want == got, "{} differs from fixture", path);
                }
            }
            Assertion::SwapBlobExists(name) => {
                ensure!(bridge.swap_store.contains(name), "No swap blob for {}", name);
            }
            Assertion::NoSwapBlob(name) => {
                ensure!(
                    !bridge.swap_store.contains(name),
                    "Swap blob for {} still present",
                    name
                );
            }
            Assertion::Evicted(expected) => {
                let report = self.last_report()?;
                ensure!(
                    report.evicted == *expected,
                    "Expected evictions {:?}, got {:?}",
                    expected,
                    report.evicted
                );
            }
            Assertion::SkippedCount(expected) => {
                let report = self.last_report()?;
                ensure!(
                    report.skipped.len() == *expected,
                    "Expected {} skipped, got {:?}",
                    expected,
                    report.skipped
                );
            }
            Assertion::RunAborted(expected) => {
                let report = self.last_report()?;
                ensure!(
                    report.aborted == *expected,
                    "Expected aborted={}, got {}",
                    expected,
                    report.aborted
                );
            }
            Assertion::OperationRejected(name) => {
                let outcome = bridge
                    .context_store
                    .in_context_with_lock(name, |_| Ok::<_, BridgeError>(()));
                match outcome {
                    Err(BridgeError::ShuttingDown) => {}
                    other => bail!("Expected ShuttingDown for {}, got {:?}", name, other),
                }
            }
            Assertion::Custom(check) => check(bridge)?,
        }
        Ok(())
    }

    fn last_report(&self) -> Result<&SwapReport> {
        self.last_report
            .as_ref()
            .ok_or_else(|| anyhow!("No swap run yet"))
    }
}

/// Every file under `dir` as (relative path, content), sorted by path.
fn list_files(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(base, &path, out)?;
            } else {
                let relative = path.strip_prefix(base)?.to_string_lossy().into_owned();
                out.push((relative, fs::read(&path)?));
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
