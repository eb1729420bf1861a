//! Remote storage for swapped-out project archives.

use crate::error::{BridgeError, Result};
use crate::repo_store::validate_project_name;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Blob storage keyed by project name.
pub trait SwapStore: Send + Sync {
    /// Stores exactly `size` bytes read from `stream` under `project_name`,
    /// replacing any previous blob.
    ///
    /// # Errors
    ///
    /// `SizeMismatch` if the stream yields a different number of bytes; no
    /// blob is stored in that case.
    fn upload(&self, project_name: &str, stream: &mut dyn Read, size: u64) -> Result<()>;

    /// Opens the stored blob for reading.
    ///
    /// # Errors
    ///
    /// `SwapBlobNotFound` if nothing is stored under `project_name`.
    fn open_download_stream(&self, project_name: &str) -> Result<Box<dyn Read + Send>>;

    /// Deletes the stored blob. A missing blob is not an error.
    fn remove(&self, project_name: &str) -> Result<()>;

    /// True if a blob is stored under `project_name`.
    fn contains(&self, project_name: &str) -> bool;
}

const BLOB_EXT: &str = "swap";
const CHECKSUM_EXT: &str = "blake3";

/// [`SwapStore`] keeping one file per project in a directory.
///
/// Blobs are written to a temp file and renamed into place. A BLAKE3
/// checksum sidecar is written alongside and checked before every download.
#[derive(Debug, Clone)]
pub struct DirSwapStore {
    root: PathBuf,
}

impl DirSwapStore {
    /// Opens the store at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding the blobs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, project_name: &str) -> Result<PathBuf> {
        validate_project_name(project_name)?;
        Ok(self.root.join(format!("{}.{}", project_name, BLOB_EXT)))
    }

    fn checksum_path(&self, project_name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", project_name, CHECKSUM_EXT))
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let tmp_path = Self::tmp_path(path);
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn hash_file(file: &mut File) -> io::Result<blake3::Hash> {
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }
}

impl SwapStore for DirSwapStore {
    fn upload(&self, project_name: &str, stream: &mut dyn Read, size: u64) -> Result<()> {
        let path = self.blob_path(project_name)?;
        let tmp_path = Self::tmp_path(&path);

        let mut hasher = blake3::Hasher::new();
        let mut written = 0u64;
        {
            let mut file = File::create(&tmp_path)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        let _ = fs::remove_file(&tmp_path);
                        return Err(e.into());
                    }
                };
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n])?;
                written += n as u64;
            }
            file.sync_all()?;
        }

        if written != size {
            let _ = fs::remove_file(&tmp_path);
            return Err(BridgeError::SizeMismatch {
                project: project_name.to_string(),
                expected: size,
                actual: written,
            });
        }

        // Checksum first: a blob without its sidecar would fail verification,
        // a sidecar without its blob reads as not found.
        let checksum = hex::encode(hasher.finalize().as_bytes());
        Self::write_atomic(&self.checksum_path(project_name), checksum.as_bytes())?;
        fs::rename(&tmp_path, &path)?;
        debug!(project = %project_name, size, "Uploaded swap blob");
        Ok(())
    }

    fn open_download_stream(&self, project_name: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.blob_path(project_name)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BridgeError::SwapBlobNotFound(project_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let corrupted = |reason: String| BridgeError::CorruptedSwapBlob {
            project: project_name.to_string(),
            reason,
        };
        let sidecar = fs::read_to_string(self.checksum_path(project_name))
            .map_err(|e| corrupted(format!("checksum unreadable: {}", e)))?;
        let expected = hex::decode(sidecar.trim())
            .map_err(|e| corrupted(format!("checksum malformed: {}", e)))?;
        let actual = Self::hash_file(&mut file)?;
        if actual.as_bytes()[..] != expected[..] {
            return Err(corrupted("checksum mismatch".to_string()));
        }

        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(file))
    }

    fn remove(&self, project_name: &str) -> Result<()> {
        let path = self.blob_path(project_name)?;
        for p in [path, self.checksum_path(project_name)] {
            match fs::remove_file(&p) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(project = %project_name, "Removed swap blob");
        Ok(())
    }

    fn contains(&self, project_name: &str) -> bool {
        self.blob_path(project_name)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }
}

/// [`SwapStore`] held in memory. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct InMemorySwapStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySwapStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }
}

impl SwapStore for InMemorySwapStore {
    fn upload(&self, project_name: &str, stream: &mut dyn Read, size: u64) -> Result<()> {
        let mut data = Vec::with_capacity(size as usize);
        stream.read_to_end(&mut data)?;
        if data.len() as u64 != size {
            return Err(BridgeError::SizeMismatch {
                project: project_name.to_string(),
                expected: size,
                actual: data.len() as u64,
            });
        }
        self.blobs().insert(project_name.to_string(), data);
        Ok(())
    }

    fn open_download_stream(&self, project_name: &str) -> Result<Box<dyn Read + Send>> {
        self.blobs()
            .get(project_name)
            .map(|data| Box::new(Cursor::new(data.clone())) as Box<dyn Read + Send>)
            .ok_or_else(|| BridgeError::SwapBlobNotFound(project_name.to_string()))
    }

    fn remove(&self, project_name: &str) -> Result<()> {
        self.blobs().remove(project_name);
        Ok(())
    }

    fn contains(&self, project_name: &str) -> bool {
        self.blobs().contains_key(project_name)
    }
}
