use super::runner::Bridge;
use anyhow::Result;
use bridge_core::ProjectState;

/// Declarative assertions on bridge state
pub enum Assertion {
    // Project rows
    State {
        name: String,
        state: ProjectState,
    },
    Version {
        name: String,
        version: i64,
    },
    ResidentProjects(usize),

    // Disk
    OnDisk(String),
    NotOnDisk(String),
    DiskUsageAtMost(u64),
    FileContent {
        project: String,
        path: String,
        content: Vec<u8>,
    },
    MatchesFixture {
        project: String,
        fixture: String,
    },

    // Swap storage
    SwapBlobExists(String),
    NoSwapBlob(String),

    // Last swap run
    Evicted(Vec<String>),
    SkippedCount(usize),
    RunAborted(bool),

    // Lifecycle
    OperationRejected(String),

    // Custom (gets the live components)
    Custom(Box<dyn Fn(&Bridge) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State { name, state } => {
                write!(f, "State {{ name: {:?}, state: {:?} }}", name, state)
            }
            Self::Version { name, version } => {
                write!(f, "Version {{ name: {:?}, version: {} }}", name, version)
            }
            Self::ResidentProjects(n) => write!(f, "ResidentProjects({})", n),
            Self::OnDisk(name) => write!(f, "OnDisk({:?})", name),
            Self::NotOnDisk(name) => write!(f, "NotOnDisk({:?})", name),
            Self::DiskUsageAtMost(n) => write!(f, "DiskUsageAtMost({})", n),
            Self::FileContent { project, path, .. } => {
                write!(f, "FileContent {{ project: {:?}, path: {:?} }}", project, path)
            }
            Self::MatchesFixture { project, fixture } => {
                write!(f, "MatchesFixture {{ project: {:?}, fixture: {:?} }}", project, fixture)
            }
            Self::SwapBlobExists(name) => write!(f, "SwapBlobExists({:?})", name),
            Self::NoSwapBlob(name) => write!(f, "NoSwapBlob({:?})", name),
            Self::Evicted(names) => write!(f, "Evicted({:?})", names),
            Self::SkippedCount(n) => write!(f, "SkippedCount({})", n),
            Self::RunAborted(b) => write!(f, "RunAborted({})", b),
            Self::OperationRejected(name) => write!(f, "OperationRejected({:?})", name),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}
