//! Shared result sink.
//!
//! Every worker appends its processed batches under the same cache ID. The
//! coordinator only hands out a [`CacheRef`]; each worker opens it locally.
//!
//! [`LocalFilesystemCache`] stores every append as its own file under
//! `<dir>/<cache_id>/`, so independent writers never touch the same file and
//! need no locking.

use crate::batch::Batch;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors raised by caches.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// Filesystem failure.
  #[error("Cache I/O error at {path}: {source}")]
  Io {
    /// Path being accessed.
    path: PathBuf,
    /// Underlying error.
    #[source]
    source: io::Error,
  },
  /// A stored batch could not be encoded or decoded.
  #[error("Cache serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  /// The cache ID is not usable as a key.
  #[error("Invalid cache id: {0:?}")]
  InvalidId(String),
}

/// Key/value collector for processed batches.
pub trait Cache: Send + Sync {
  /// Appends `batch` under `id`. Safe to call concurrently from many writers.
  fn append(&self, id: &str, batch: &Batch) -> Result<(), CacheError>;

  /// Reads every batch stored under `id`, in no particular order.
  fn read(&self, id: &str) -> Result<Vec<Batch>, CacheError>;

  /// Whether anything is stored under `id`.
  fn has(&self, id: &str) -> Result<bool, CacheError>;

  /// Removes everything stored under `id`.
  fn clear(&self, id: &str) -> Result<(), CacheError>;
}

/// Serializable handle to a cache, sent to workers at setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheRef {
  /// A [`LocalFilesystemCache`] rooted at `path`.
  Filesystem {
    /// Root directory.
    path: PathBuf,
  },
}

impl CacheRef {
  /// Filesystem cache rooted at `path`.
  #[must_use]
  pub fn filesystem(path: impl Into<PathBuf>) -> Self {
    CacheRef::Filesystem { path: path.into() }
  }

  /// Opens the cache this handle points to.
  #[must_use]
  pub fn open(&self) -> Arc<dyn Cache> {
    match self {
      CacheRef::Filesystem { path } => Arc::new(LocalFilesystemCache::new(path.clone())),
    }
  }
}

impl Default for CacheRef {
  fn default() -> Self {
    CacheRef::filesystem(std::env::temp_dir().join("streamweave-pool"))
  }
}

/// Filesystem-backed cache.
#[derive(Debug, Clone)]
pub struct LocalFilesystemCache {
  dir: PathBuf,
}

impl LocalFilesystemCache {
  /// Creates a cache rooted at `dir`. The directory is created on first append.
  #[must_use]
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  /// Root directory.
  #[must_use]
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn key_dir(&self, id: &str) -> Result<PathBuf, CacheError> {
    if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
      return Err(CacheError::InvalidId(id.to_string()));
    }
    Ok(self.dir.join(id))
  }
}

impl Cache for LocalFilesystemCache {
  fn append(&self, id: &str, batch: &Batch) -> Result<(), CacheError> {
    let dir = self.key_dir(id)?;
    fs::create_dir_all(&dir).map_err(io_err(&dir))?;

    let payload = serde_json::to_vec(batch)?;
    let token: String = rand::thread_rng()
      .sample_iter(&Alphanumeric)
      .take(16)
      .map(char::from)
      .collect();
    // Write then rename so readers never observe a half-written entry.
    let tmp = dir.join(format!(".{}.tmp", token));
    let path = dir.join(format!("{}.json", token));
    fs::write(&tmp, payload).map_err(io_err(&tmp))?;
    fs::rename(&tmp, &path).map_err(io_err(&path))?;
    Ok(())
  }

  fn read(&self, id: &str) -> Result<Vec<Batch>, CacheError> {
    let dir = self.key_dir(id)?;
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(CacheError::Io { path: dir, source: e }),
    };

    let mut batches = Vec::new();
    for entry in entries {
      let path = entry.map_err(io_err(&dir))?.path();
      if path.extension().is_some_and(|ext| ext == "json") {
        let bytes = fs::read(&path).map_err(io_err(&path))?;
        batches.push(serde_json::from_slice(&bytes)?);
      }
    }
    Ok(batches)
  }

  fn has(&self, id: &str) -> Result<bool, CacheError> {
    let dir = self.key_dir(id)?;
    match fs::read_dir(&dir) {
      Ok(mut entries) => Ok(entries.next().is_some()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(CacheError::Io { path: dir, source: e }),
    }
  }

  fn clear(&self, id: &str) -> Result<(), CacheError> {
    let dir = self.key_dir(id)?;
    match fs::remove_dir_all(&dir) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(CacheError::Io { path: dir, source: e }),
    }
  }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError {
  let path = path.to_path_buf();
  move |source| CacheError::Io { path, source }
}
