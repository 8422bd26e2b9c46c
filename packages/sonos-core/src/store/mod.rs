//! File-backed persistence for preferences, credentials and scenes.
//!
//! Each store owns one JSON file. Writes go to a sibling temp file that is
//! renamed over the target, so a crash never leaves a half-written file.
//! On unix the file is restricted to the owner (mode 0600) because several
//! stores hold credentials.

pub mod apple_music;
pub mod config;
pub mod scenes;
pub mod tokens;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorCode;

pub use apple_music::{AppleMusicToken, AppleMusicTokenStore, FileAppleMusicTokenStore};
pub use config::{ConfigStore, CoreConfig, FileConfigStore, OutputFormat};
pub use scenes::{FileSceneStore, Scene, SceneDevice, SceneGroup, SceneStore};
pub use tokens::{FileSmapiTokenStore, MemorySmapiTokenStore, SmapiTokenStore};

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("store contents are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "store_io_error",
            Self::Json(_) => "store_corrupt",
            Self::InvalidName(_) => "invalid_argument",
        }
    }
}

/// Convenient Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A JSON document on disk with serialized read-modify-write access.
#[derive(Debug)]
pub struct JsonFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document. A missing file is `None`.
    pub fn read<T: DeserializeOwned>(&self) -> StoreResult<Option<T>> {
        let _guard = self.lock.lock();
        self.read_unlocked()
    }

    /// Replaces the document atomically.
    pub fn write<T: Serialize>(&self, value: &T) -> StoreResult<()> {
        let _guard = self.lock.lock();
        self.write_unlocked(value)
    }

    /// Loads the document (or its default), applies `f` and writes it back.
    ///
    /// The write is skipped when `f` returns `false`.
    pub fn update<T, F>(&self, f: F) -> StoreResult<()>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> bool,
    {
        let _guard = self.lock.lock();
        let mut value: T = self.read_unlocked()?.unwrap_or_default();
        if f(&mut value) {
            self.write_unlocked(&value)?;
        }
        Ok(())
    }

    /// Deletes the file. Returns false if it did not exist.
    pub fn remove(&self) -> StoreResult<bool> {
        let _guard = self.lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn read_unlocked<T: DeserializeOwned>(&self) -> StoreResult<Option<T>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_unlocked<T: Serialize>(&self, value: &T) -> StoreResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let temp_path = temp_path_for(&self.path);
        let contents = serde_json::to_string_pretty(value)?;

        fs::write(&temp_path, contents)?;
        restrict_permissions(&temp_path)?;
        fs::rename(&temp_path, &self.path)?;
        log::debug!("[Store] Wrote {}", self.path.display());
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
