use std::time::Duration;

use super::assertions::Assertion;

/// All possible actions in a test scenario
#[derive(Debug)]
pub enum ScenarioStep {
    // Project setup
    CreateProject {
        name: String,
        size: usize,
    },
    CreateProjectFromFixture {
        name: String,
        fixture: String,
    },
    Register {
        name: String,
        version: i64,
    },

    // Operations under the project lock
    Access {
        name: String,
    },
    Evict {
        name: String,
    },
    Restore {
        name: String,
    },

    // Swap job
    RunSwap,

    // Time control
    Wait {
        duration: Duration,
    },

    // Lifecycle
    Shutdown,
    Restart,

    // Assertions (can be interspersed)
    Assert {
        assertion: Assertion,
    },
}
