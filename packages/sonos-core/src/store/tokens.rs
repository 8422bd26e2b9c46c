//! SMAPI credential persistence keyed by (service id, household id).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{JsonFile, StoreResult};
use crate::smapi::types::TokenPair;

/// Credential storage for SMAPI clients.
///
/// Implementations must tolerate a save racing a load for the same key.
pub trait SmapiTokenStore: Send + Sync {
    fn has(&self, service_id: &str, household_id: &str) -> StoreResult<bool> {
        Ok(self
            .load(service_id, household_id)?
            .is_some_and(|p| p.is_valid()))
    }
    fn load(&self, service_id: &str, household_id: &str) -> StoreResult<Option<TokenPair>>;
    fn save(&self, service_id: &str, household_id: &str, pair: &TokenPair) -> StoreResult<()>;
}

fn store_key(service_id: &str, household_id: &str) -> String {
    format!("{}#{}", service_id, household_id)
}

/// In-process [`SmapiTokenStore`].
#[derive(Debug, Default)]
pub struct MemorySmapiTokenStore {
    pairs: Mutex<HashMap<String, TokenPair>>,
}

impl MemorySmapiTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SmapiTokenStore for MemorySmapiTokenStore {
    fn load(&self, service_id: &str, household_id: &str) -> StoreResult<Option<TokenPair>> {
        Ok(self.pairs.lock().get(&store_key(service_id, household_id)).cloned())
    }

    fn save(&self, service_id: &str, household_id: &str, pair: &TokenPair) -> StoreResult<()> {
        self.pairs
            .lock()
            .insert(store_key(service_id, household_id), pair.clone());
        Ok(())
    }
}

/// [`SmapiTokenStore`] keeping every pair in one owner-only JSON file.
#[derive(Debug)]
pub struct FileSmapiTokenStore {
    file: JsonFile,
}

impl FileSmapiTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl SmapiTokenStore for FileSmapiTokenStore {
    fn load(&self, service_id: &str, household_id: &str) -> StoreResult<Option<TokenPair>> {
        let mut all: BTreeMap<String, TokenPair> = self.file.read()?.unwrap_or_default();
        Ok(all.remove(&store_key(service_id, household_id)))
    }

    fn save(&self, service_id: &str, household_id: &str, pair: &TokenPair) -> StoreResult<()> {
        let key = store_key(service_id, household_id);
        self.file.update(|all: &mut BTreeMap<String, TokenPair>| {
            all.insert(key, pair.clone());
            true
        })
    }
}
