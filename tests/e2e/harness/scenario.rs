use super::assertions::Assertion;
use super::runner::{ScenarioRunner, SwapLimits};
use super::steps::ScenarioStep;
use bridge_core::ProjectState;
use std::time::Duration;

/// Fluent DSL for building test scenarios
pub struct Scenario {
    name: String,
    limits: SwapLimits,
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Create a new scenario with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            limits: SwapLimits::default(),
            steps: Vec::new(),
        }
    }

    // ===== Swap settings =====

    /// Set the watermarks in bytes
    pub fn watermarks(mut self, low: u64, high: u64) -> Self {
        self.limits.low = low;
        self.limits.high = high;
        self
    }

    /// Set the minimum number of resident projects
    pub fn min_projects(mut self, min: usize) -> Self {
        self.limits.min_projects = min;
        self
    }

    /// Set the archive codec by its configured name
    pub fn compression(mut self, method: &str) -> Self {
        self.limits.compression = method.to_string();
        self
    }

    // ===== Project setup =====

    /// Create a project of `size` bytes and register it at version 1.
    ///
    /// The clock moves one minute afterwards, so projects added in order are
    /// accessed in that order.
    pub fn with_project(mut self, name: &str, size: usize) -> Self {
        self.steps.push(ScenarioStep::CreateProject {
            name: name.to_string(),
            size,
        });
        self.steps.push(ScenarioStep::Register {
            name: name.to_string(),
            version: 1,
        });
        self.wait(Duration::from_secs(60))
    }

    /// Create a project from a fixture directory and register it
    pub fn with_fixture_project(mut self, name: &str, fixture: &str, version: i64) -> Self {
        self.steps.push(ScenarioStep::CreateProjectFromFixture {
            name: name.to_string(),
            fixture: fixture.to_string(),
        });
        self.steps.push(ScenarioStep::Register {
            name: name.to_string(),
            version,
        });
        self.wait(Duration::from_secs(60))
    }

    /// Record a new version for a project
    pub fn register(mut self, name: &str, version: i64) -> Self {
        self.steps.push(ScenarioStep::Register {
            name: name.to_string(),
            version,
        });
        self
    }

    // ===== Operations =====

    /// Use a project: restore it if swapped, then touch its access time
    pub fn access(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::Access {
            name: name.to_string(),
        });
        self
    }

    /// Evict a project directly
    pub fn evict(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::Evict {
            name: name.to_string(),
        });
        self
    }

    /// Restore a project directly
    pub fn restore(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::Restore {
            name: name.to_string(),
        });
        self
    }

    /// Run one swap pass
    pub fn run_swap(mut self) -> Self {
        self.steps.push(ScenarioStep::RunSwap);
        self
    }

    // ===== Time control =====

    /// Wait for a duration
    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(ScenarioStep::Wait { duration });
        self
    }

    /// Wait for N hours
    pub fn wait_hours(self, hours: u64) -> Self {
        self.wait(Duration::from_secs(hours * 3600))
    }

    // ===== Lifecycle =====

    /// Stop the swap job and drain the context store
    pub fn shutdown(mut self) -> Self {
        self.steps.push(ScenarioStep::Shutdown);
        self
    }

    /// Drop every component and reopen them over the same directories
    pub fn restart(mut self) -> Self {
        self.steps.push(ScenarioStep::Restart);
        self
    }

    // ===== Assertions =====

    /// Add a general assertion
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.steps.push(ScenarioStep::Assert { assertion });
        self
    }

    /// Assert a project's state
    pub fn assert_state(self, name: &str, state: ProjectState) -> Self {
        self.assert(Assertion::State {
            name: name.to_string(),
            state,
        })
    }

    /// Assert the last swap run evicted exactly these projects, in order
    pub fn assert_evicted(self, names: &[&str]) -> Self {
        self.assert(Assertion::Evicted(
            names.iter().map(|n| n.to_string()).collect(),
        ))
    }

    /// Assert the number of resident projects
    pub fn assert_resident(self, count: usize) -> Self {
        self.assert(Assertion::ResidentProjects(count))
    }

    // ===== Execution =====

    /// Execute the scenario and return results
    pub fn run(self) -> ScenarioResult {
        let mut runner = match ScenarioRunner::new(self.limits.clone()) {
            Ok(r) => r,
            Err(e) => {
                return ScenarioResult {
                    name: self.name.clone(),
                    success: false,
                    steps_executed: 0,
                    failure_step: Some(0),
                    error: Some(format!("Failed to create runner: {}", e)),
                }
            }
        };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                steps_executed: self.steps.len(),
                failure_step: None,
                error: None,
            },
            Err(e) => {
                let failure_step = runner.current_step();
                ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: failure_step,
                    failure_step: Some(failure_step),
                    error: Some(format!("{:?}", e)),
                }
            }
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Unwrap the result, panicking if it failed
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "Scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    /// Expect the result to be successful
    pub fn expect(self, msg: &str) {
        if !self.success {
            panic!(
                "{}: Scenario '{}' failed at step {}: {}",
                msg,
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}
