//! User preferences shared by front-ends.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{JsonFile, StoreResult};

/// How a front-end renders results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Tsv,
    Json,
}

/// Persisted preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Room used when a command names none.
    pub default_room: Option<String>,
    pub format: OutputFormat,
}

/// Loads and saves [`CoreConfig`].
pub trait ConfigStore: Send + Sync {
    /// Returns the stored config, or defaults when nothing is stored.
    fn load(&self) -> StoreResult<CoreConfig>;
    fn save(&self, config: &CoreConfig) -> StoreResult<()>;
    fn path(&self) -> &Path;
}

/// [`ConfigStore`] backed by a JSON file.
#[derive(Debug)]
pub struct FileConfigStore {
    file: JsonFile,
}

impl FileConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> StoreResult<CoreConfig> {
        Ok(self.file.read()?.unwrap_or_default())
    }

    fn save(&self, config: &CoreConfig) -> StoreResult<()> {
        self.file.write(config)
    }

    fn path(&self) -> &Path {
        self.file.path()
    }
}
