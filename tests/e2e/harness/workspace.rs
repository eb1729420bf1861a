use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated on-disk layout for one scenario.
///
/// ```text
/// <tmp>/data/            storage root, one directory per project
/// <tmp>/data/.bridge/    embedded database
/// <tmp>/swap/            swapped archives
/// ```
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        fs::create_dir_all(dir.path().join("data"))?;
        Ok(Self { dir })
    }

    /// Get workspace path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Storage root holding the project repositories
    pub fn root(&self) -> PathBuf {
        self.path().join("data")
    }

    /// Embedded database file
    pub fn database_path(&self) -> PathBuf {
        self.root().join(".bridge").join("bridge.redb")
    }

    /// Directory for swapped archives
    pub fn swap_dir(&self) -> PathBuf {
        self.path().join("swap")
    }

    /// Create a project repository holding `size` bytes in one file
    pub fn create_sized_project(&self, name: &str, size: usize) -> Result<()> {
        // Vary the content per project so archives differ.
        let seed = name.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
        let content: Vec<u8> = (0..size).map(|i| seed.wrapping_add((i % 251) as u8)).collect();
        self.write_project_file(name, "objects/pack.bin", &content)
    }

    /// Copy a fixture directory in as project `name`
    pub fn create_project_from_fixture(&self, name: &str, fixture: &str) -> Result<()> {
        let fixture_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(fixture);

        if !fixture_path.exists() {
            anyhow::bail!("Fixture not found: {}", fixture_path.display());
        }

        let dest = self.root().join(name);
        fs::create_dir_all(&dest)?;
        copy_dir_recursive(&fixture_path, &dest)
    }

    /// Write a file inside a project repository
    pub fn write_project_file(&self, project: &str, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.root().join(project).join(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directories for {}", path))?;
        }

        fs::write(&full_path, content)
            .with_context(|| format!("Failed to write {}/{}", project, path))?;

        Ok(())
    }

    /// Read a file inside a project repository
    pub fn read_project_file(&self, project: &str, path: &str) -> Result<Vec<u8>> {
        let full_path = self.root().join(project).join(path);
        fs::read(&full_path).with_context(|| format!("Failed to read {}/{}", project, path))
    }

    /// Check if a project has a directory on disk
    pub fn project_exists(&self, project: &str) -> bool {
        self.root().join(project).is_dir()
    }
}

/// Recursively copy directory contents
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
