//! Local persistence of the user secret between sessions.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The user secret as kept on this device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUserSecret {
    /// Base64 user secret.
    #[serde(rename = "UserSecret")]
    pub secret: String,
    /// Version of the user secret object it came from.
    #[serde(rename = "UserSecretVersion")]
    pub version: u32,
}

impl std::fmt::Debug for StoredUserSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredUserSecret")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl StoredUserSecret {
    #[must_use]
    pub fn new(secret: &[u8], version: u32) -> Self {
        Self {
            secret: STANDARD.encode(secret),
            version,
        }
    }
}

/// Consumer-provided persistence for the user secret.
///
/// A missing secret while logged in means local state was tampered with; the
/// session is then invalidated.
pub trait SecretStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredUserSecret>, Error>;

    fn save(&self, secret: &StoredUserSecret) -> Result<(), Error>;

    /// Remove the secret (logout).
    fn clear(&self) -> Result<(), Error>;
}

/// Keeps the secret for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secret: Mutex<Option<StoredUserSecret>>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn load(&self) -> Result<Option<StoredUserSecret>, Error> {
        Ok(self
            .secret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, secret: &StoredUserSecret) -> Result<(), Error> {
        *self.secret.lock().unwrap_or_else(PoisonError::into_inner) = Some(secret.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        *self.secret.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Keeps the secret in a JSON file.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, action: &str, e: &std::io::Error) -> Error {
        Error::SecretStore(format!("could not {action} {}: {e}", self.path.display()))
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self) -> Result<Option<StoredUserSecret>, Error> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error("read", &e)),
        }
    }

    fn save(&self, secret: &StoredUserSecret) -> Result<(), Error> {
        let json = serde_json::to_vec(secret)?;
        std::fs::write(&self.path, json).map_err(|e| self.io_error("write", &e))
    }

    fn clear(&self) -> Result<(), Error> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error("remove", &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySecretStore::new();
        assert_eq!(store.load().unwrap(), None);

        let secret = StoredUserSecret::new(&[7; 32], 1);
        store.save(&secret).unwrap();
        assert_eq!(store.load().unwrap(), Some(secret));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secret.json"));
        assert_eq!(store.load().unwrap(), None);

        let secret = StoredUserSecret::new(b"0123456789abcdef0123456789abcdef", 1);
        store.save(&secret).unwrap();
        assert_eq!(FileSecretStore::new(store.path()).load().unwrap(), Some(secret));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn file_format_uses_storage_keys() {
        let secret = StoredUserSecret::new(&[0; 3], 0);
        assert_eq!(
            serde_json::to_string(&secret).unwrap(),
            r#"{"UserSecret":"AAAA","UserSecretVersion":0}"#
        );
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(FileSecretStore::new(path).load(), Err(Error::Json(_))));
    }

    #[test]
    fn debug_hides_the_secret() {
        let secret = StoredUserSecret::new(b"very secret", 1);
        assert!(!format!("{secret:?}").contains(&secret.secret));
    }
}
