//! Apple Music user token persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{JsonFile, StoreResult};
use crate::protocol_constants::APPLE_MUSIC_TOKEN_MAX_AGE;

/// Tokens authorizing catalog and library requests for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleMusicToken {
    pub developer_token: String,
    pub music_user_token: String,
    #[serde(default)]
    pub storefront: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds. When absent the token ages out after 180 days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl AppleMusicToken {
    /// Returns true once the token should no longer be used.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms > expires_at,
            None => {
                let max_age = APPLE_MUSIC_TOKEN_MAX_AGE.as_millis() as u64;
                now_ms.saturating_sub(self.created_at) > max_age
            }
        }
    }
}

/// Loads, saves and deletes the Apple Music token.
pub trait AppleMusicTokenStore: Send + Sync {
    fn load(&self) -> StoreResult<Option<AppleMusicToken>>;
    fn save(&self, token: &AppleMusicToken) -> StoreResult<()>;
    /// Returns false if no token was stored.
    fn delete(&self) -> StoreResult<bool>;
    fn path(&self) -> &Path;
}

/// [`AppleMusicTokenStore`] backed by a JSON file.
#[derive(Debug)]
pub struct FileAppleMusicTokenStore {
    file: JsonFile,
}

impl FileAppleMusicTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }
}

impl AppleMusicTokenStore for FileAppleMusicTokenStore {
    fn load(&self) -> StoreResult<Option<AppleMusicToken>> {
        self.file.read()
    }

    fn save(&self, token: &AppleMusicToken) -> StoreResult<()> {
        self.file.write(token)
    }

    fn delete(&self) -> StoreResult<bool> {
        self.file.remove()
    }

    fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn token(created_at: u64, expires_at: Option<u64>) -> AppleMusicToken {
        AppleMusicToken {
            developer_token: "dev".into(),
            music_user_token: "user".into(),
            storefront: "us".into(),
            created_at,
            expires_at,
        }
    }

    #[test]
    fn age_based_expiry() {
        let t = token(0, None);
        assert!(!t.is_expired(180 * DAY_MS));
        assert!(t.is_expired(180 * DAY_MS + 1));
    }

    #[test]
    fn explicit_expiry_wins() {
        let t = token(0, Some(10 * DAY_MS));
        assert!(!t.is_expired(10 * DAY_MS));
        assert!(t.is_expired(10 * DAY_MS + 1));

        let long = token(0, Some(400 * DAY_MS));
        assert!(!long.is_expired(200 * DAY_MS));
    }

    #[test]
    fn file_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAppleMusicTokenStore::new(dir.path().join("apple.json"));
        assert!(store.load().unwrap().is_none());

        let t = token(5, None);
        store.save(&t).unwrap();
        assert_eq!(store.load().unwrap(), Some(t));

        assert!(store.delete().unwrap());
        assert!(store.load().unwrap().is_none());
        assert!(!store.delete().unwrap());
    }
}
