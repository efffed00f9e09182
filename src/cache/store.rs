use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Content-addressed file storage under the cache directory.
///
/// Each URL maps to `<dir>/<sha256 hex of URL>`; downloads in progress are
/// written to the same name with a `.part` suffix.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create cache dir: {}", self.dir.display()))
    }

    /// File name for a URL; only hex digits, safe on every filesystem.
    pub fn file_name(url: &str) -> String {
        format!("{:x}", Sha256::digest(url.as_bytes()))
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::file_name(url))
    }

    pub fn temp_path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.part", Self::file_name(url)))
    }

    /// Size of the cached file for `url`, if present.
    pub async fn cached_len(&self, url: &str) -> Option<u64> {
        tokio::fs::metadata(self.path_for(url))
            .await
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    /// Delete the file for `url`; a missing file is not an error.
    pub async fn remove(&self, url: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(url)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete cached file for {url}")),
        }
    }

    /// Delete every file in the cache directory.
    pub async fn clear(&self) -> Result<u64> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to read cache dir"),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
