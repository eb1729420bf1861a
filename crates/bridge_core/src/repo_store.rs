//! On-disk project repositories.
//!
//! Each project lives in its own directory directly under the storage root.
//! Top-level entries starting with `.` belong to the bridge itself (state
//! directory, restore staging) and are never counted as project data.

use crate::error::{BridgeError, Result};
use crate::swap::CompressionMethod;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A compressed archive ready to upload, with its exact byte length.
pub struct ArchiveStream {
    /// Archive bytes, positioned at the start.
    pub reader: Box<dyn Read + Send>,
    /// Number of bytes `reader` will yield.
    pub size: u64,
}

impl std::fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Report from garbage-collecting one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Repository size before collection.
    pub bytes_before: u64,
    /// Repository size after collection.
    pub bytes_after: u64,
    /// Leftover `*.tmp` files removed.
    pub temp_files_removed: usize,
    /// Whether `git gc` ran.
    pub ran_git_gc: bool,
}

impl GcReport {
    /// Bytes reclaimed, zero if the repository grew.
    pub fn bytes_freed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Local storage for project repositories.
pub trait RepoStore: Send + Sync {
    /// Root directory holding all project repositories.
    fn root(&self) -> &Path;

    /// Bytes used by all project repositories.
    fn total_size(&self) -> Result<u64>;

    /// Bytes used by one project's repository (0 if absent).
    fn project_size(&self, project_name: &str) -> Result<u64>;

    /// True if the project has a repository on disk.
    fn exists(&self, project_name: &str) -> bool;

    /// Compacts the project's repository.
    fn gc_project(&self, project_name: &str) -> Result<GcReport>;

    /// Archives the project as a gzip-compressed tarball.
    fn gzip_project(&self, project_name: &str) -> Result<ArchiveStream>;

    /// Archives the project as a bzip2-compressed tarball.
    fn bzip2_project(&self, project_name: &str) -> Result<ArchiveStream>;

    /// Recreates the project from a gzip-compressed tarball, replacing any
    /// existing repository.
    fn ungzip_project(&self, project_name: &str, stream: &mut dyn Read) -> Result<()>;

    /// Recreates the project from a bzip2-compressed tarball, replacing any
    /// existing repository.
    fn unbzip2_project(&self, project_name: &str, stream: &mut dyn Read) -> Result<()>;

    /// Deletes the project's repository. A missing repository is not an error.
    fn remove(&self, project_name: &str) -> Result<()>;
}

/// Rejects names that can't safely be used as a single directory component.
pub fn validate_project_name(project_name: &str) -> Result<()> {
    let invalid = project_name.is_empty()
        || project_name.starts_with('.')
        || project_name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(BridgeError::InvalidProjectName(project_name.to_string()));
    }
    Ok(())
}

/// [`RepoStore`] over a directory tree.
///
/// # Examples
///
/// ```
/// use bridge_core::{FsRepoStore, RepoStore};
/// use tempfile::TempDir;
///
/// let tmp = TempDir::new().unwrap();
/// let store = FsRepoStore::new(tmp.path()).unwrap();
/// std::fs::create_dir(tmp.path().join("proj1")).unwrap();
/// std::fs::write(tmp.path().join("proj1/main.tex"), b"hello").unwrap();
///
/// assert_eq!(store.total_size().unwrap(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct FsRepoStore {
    root: PathBuf,
}

impl FsRepoStore {
    /// Opens the store at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory for `project_name`, after validating the name.
    pub fn project_dir(&self, project_name: &str) -> Result<PathBuf> {
        validate_project_name(project_name)?;
        Ok(self.root.join(project_name))
    }

    fn existing_project_dir(&self, project_name: &str) -> Result<PathBuf> {
        let dir = self.project_dir(project_name)?;
        if !dir.is_dir() {
            return Err(BridgeError::ProjectNotFound(project_name.to_string()));
        }
        Ok(dir)
    }

    fn archive<W: Write>(dir: &Path, writer: W) -> io::Result<W> {
        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", dir)?;
        builder.into_inner()
    }

    /// Writes a compressed archive of the project to an anonymous temp file.
    fn archive_project(
        &self,
        project_name: &str,
        method: CompressionMethod,
    ) -> Result<ArchiveStream> {
        let dir = self.existing_project_dir(project_name)?;
        let mut file = tempfile::tempfile()?;

        let compressed = match method {
            CompressionMethod::Gzip => {
                let encoder = GzEncoder::new(&mut file, flate2::Compression::default());
                Self::archive(&dir, encoder).and_then(|e| e.finish())
            }
            CompressionMethod::Bzip2 => {
                let encoder = BzEncoder::new(&mut file, bzip2::Compression::default());
                Self::archive(&dir, encoder).and_then(|e| e.finish())
            }
        };
        compressed.map_err(|e| {
            BridgeError::Compression(format!("Failed to {} {}: {}", method, project_name, e))
        })?;

        file.flush()?;
        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        debug!(project = %project_name, %method, size, "Archived project");
        Ok(ArchiveStream {
            reader: Box::new(file),
            size,
        })
    }

    /// Unpacks into a staging directory under the root, then swaps it in.
    fn unpack_project<R: Read>(
        &self,
        project_name: &str,
        decoder: R,
        method: CompressionMethod,
    ) -> Result<()> {
        let target = self.project_dir(project_name)?;
        let staging = tempfile::Builder::new()
            .prefix(".restore-")
            .tempdir_in(&self.root)?;
        let fresh = staging.path().join("repo");

        tar::Archive::new(decoder).unpack(&fresh).map_err(|e| {
            BridgeError::Compression(format!("Failed to un{} {}: {}", method, project_name, e))
        })?;

        if target.exists() {
            warn!(project = %project_name, "Replacing existing repository during restore");
            fs::rename(&target, staging.path().join("old"))?;
        }
        fs::rename(&fresh, &target)?;
        debug!(project = %project_name, %method, "Unpacked project");
        Ok(())
    }

    fn run_git_gc(dir: &Path) -> Result<bool> {
        let is_bare = dir.join("objects").is_dir() && dir.join("HEAD").is_file();
        let is_git = dir.join(".git").exists() || is_bare;
        if !is_git {
            return Ok(false);
        }
        let output = match Command::new("git")
            .args(["gc", "--quiet"])
            .current_dir(dir)
            .output()
        {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("git not found, skipping git gc");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if !output.status.success() {
            return Err(BridgeError::Io(io::Error::other(format!(
                "git gc failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))));
        }
        Ok(true)
    }
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| BridgeError::Io(io::Error::other(e.to_string())))?;
        if entry.file_type().is_file() {
            total += entry
                .metadata()
                .map_err(|e| BridgeError::Io(io::Error::other(e.to_string())))?
                .len();
        }
    }
    Ok(total)
}

impl RepoStore for FsRepoStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                total += dir_size(&entry.path())?;
            } else if file_type.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn project_size(&self, project_name: &str) -> Result<u64> {
        let dir = self.project_dir(project_name)?;
        if !dir.exists() {
            return Ok(0);
        }
        dir_size(&dir)
    }

    fn exists(&self, project_name: &str) -> bool {
        self.project_dir(project_name)
            .map(|dir| dir.is_dir())
            .unwrap_or(false)
    }

    fn gc_project(&self, project_name: &str) -> Result<GcReport> {
        let dir = self.existing_project_dir(project_name)?;
        let mut report = GcReport {
            bytes_before: dir_size(&dir)?,
            ..Default::default()
        };

        let temp_files: Vec<PathBuf> = WalkDir::new(&dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .map(|e| e.into_path())
            .collect();
        for path in temp_files {
            match fs::remove_file(&path) {
                Ok(()) => report.temp_files_removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
        }

        report.ran_git_gc = Self::run_git_gc(&dir)?;
        report.bytes_after = dir_size(&dir)?;
        info!(
            project = %project_name,
            freed = report.bytes_freed(),
            temp_files = report.temp_files_removed,
            "Garbage collected project"
        );
        Ok(report)
    }

    fn gzip_project(&self, project_name: &str) -> Result<ArchiveStream> {
        self.archive_project(project_name, CompressionMethod::Gzip)
    }

    fn bzip2_project(&self, project_name: &str) -> Result<ArchiveStream> {
        self.archive_project(project_name, CompressionMethod::Bzip2)
    }

    fn ungzip_project(&self, project_name: &str, stream: &mut dyn Read) -> Result<()> {
        self.unpack_project(project_name, GzDecoder::new(stream), CompressionMethod::Gzip)
    }

    fn unbzip2_project(&self, project_name: &str, stream: &mut dyn Read) -> Result<()> {
        self.unpack_project(project_name, BzDecoder::new(stream), CompressionMethod::Bzip2)
    }

    fn remove(&self, project_name: &str) -> Result<()> {
        let dir = self.project_dir(project_name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(project = %project_name, "Removed project repository");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
