//! Error types for bridge_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for bridge_core operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The project's lock could not be taken within the lock timeout.
    #[error("project lock busy: {project}")]
    LockBusy {
        /// Project whose lock was contended
        project: String,
    },

    /// An operation was attempted after shutdown started draining.
    #[error("service is shutting down")]
    ShuttingDown,

    /// A context for this project is already open in the current call chain.
    #[error("context already open for project: {0}")]
    ContextAlreadyOpen(String),

    /// A per-project store operation was attempted without holding the lock.
    #[error("context for project {0} is not locked")]
    ContextNotLocked(String),

    /// unlock was called by something that does not own the lock.
    #[error("lock for project {0} is not held by the caller")]
    LockNotHeld(String),

    /// A swapped project has no recorded compression method.
    #[error("missing swap compression for project: {0}")]
    MissingSwapCompression(String),

    /// A swapped project records a compression method this build can't reverse.
    #[error("unknown compression method {method:?} recorded for project {project}")]
    UnknownCompression {
        /// Project being restored
        project: String,
        /// The recorded method
        method: String,
    },

    /// A swap blob failed its integrity check.
    #[error("corrupted swap blob for {project}: {reason}")]
    CorruptedSwapBlob {
        /// Project the blob belongs to
        project: String,
        /// Description of the corruption
        reason: String,
    },

    /// No swap blob exists for the project.
    #[error("swap blob not found: {0}")]
    SwapBlobNotFound(String),

    /// An uploaded stream didn't match its declared length.
    #[error("size mismatch for {project}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Project being uploaded
        project: String,
        /// Declared size
        expected: u64,
        /// Bytes actually read
        actual: u64,
    },

    /// The project has no repository on disk.
    #[error("project not found on disk: {0}")]
    ProjectNotFound(String),

    /// The backing store has no row with a real version for the project.
    #[error("no recorded version for project: {0}")]
    ProjectNotRecorded(String),

    /// Eviction was asked for a project whose repository is not resident.
    #[error("project {project} is {state}, only present projects can be evicted")]
    NotResident {
        /// Project named in the request
        project: String,
        /// State recorded in the backing store
        state: crate::db::ProjectState,
    },

    /// The project name can't be used as a repository directory name.
    #[error("invalid project name: {0:?}")]
    InvalidProjectName(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Backing store query or transaction failed.
    #[error("database error: {0}")]
    Database(String),

    /// The embedded storage root is locked by another process.
    #[error("storage root {} locked by another process (PID: {pid})", path.display())]
    StorageLocked {
        /// Path to the lock file
        path: PathBuf,
        /// Process ID recorded in the lock file (0 if unreadable)
        pid: u32,
    },

    /// ContextStore::install was called twice.
    #[error("context store already initialized")]
    ContextStoreAlreadyInitialized,

    /// ContextStore::global was called before install.
    #[error("context store not initialized")]
    ContextStoreNotInitialized,

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classes of failure, used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Lock contention; retry later.
    Contention,
    /// The service is draining; report temporary unavailability.
    Shutdown,
    /// Persisted state is inconsistent; needs an operator.
    Consistency,
    /// I/O or database failure that may succeed on a later attempt.
    Transient,
    /// Programming or configuration error.
    Usage,
}

impl BridgeError {
    /// Classifies the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LockBusy { .. } => ErrorCategory::Contention,
            Self::ShuttingDown => ErrorCategory::Shutdown,
            Self::MissingSwapCompression(_)
            | Self::UnknownCompression { .. }
            | Self::CorruptedSwapBlob { .. }
            | Self::ProjectNotRecorded(_) => ErrorCategory::Consistency,
            Self::SwapBlobNotFound(_)
            | Self::SizeMismatch { .. }
            | Self::ProjectNotFound(_)
            | Self::Compression(_)
            | Self::Database(_)
            | Self::Io(_) => ErrorCategory::Transient,
            Self::ContextAlreadyOpen(_)
            | Self::ContextNotLocked(_)
            | Self::LockNotHeld(_)
            | Self::NotResident { .. }
            | Self::InvalidProjectName(_)
            | Self::StorageLocked { .. }
            | Self::ContextStoreAlreadyInitialized
            | Self::ContextStoreNotInitialized
            | Self::ConfigError(_) => ErrorCategory::Usage,
        }
    }

    /// True for errors an outer caller should map to a "try again" response.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Contention | ErrorCategory::Shutdown
        )
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::LockBusy { .. } => {
                Some("Another operation is working on this project. Try again shortly.")
            }
            Self::ShuttingDown => Some("The service is shutting down. Retry once it is back up."),
            Self::MissingSwapCompression(_) | Self::UnknownCompression { .. } => Some(
                "The project's swap record is inconsistent. Inspect it with 'bridge status <project>' before restoring by hand.",
            ),
            Self::CorruptedSwapBlob { .. } => {
                Some("The swapped copy failed verification. Recover it from a backup of the swap store.")
            }
            Self::ProjectNotRecorded(_) => {
                Some("Record the project's version with 'bridge register' before swapping it.")
            }
            Self::StorageLocked { .. } => Some(
                "Another bridge process owns this storage root. Stop it, or use the postgres backend to share state.",
            ),
            Self::ContextStoreNotInitialized => {
                Some("Call ContextStore::install during startup before running operations.")
            }
            _ => None,
        }
    }
}

/// Convenience Result type for bridge_core operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
