//! Credential persistence

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Credential, StoredCredential};
use crate::types::{now_nanos, RelayError, Result};

/// Where the app keeps its current credential
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, credential: &Credential) -> Result<()>;

    /// Load the stored credential, discarding it if it no longer verifies.
    async fn load(&self) -> Result<Option<Credential>>;

    async fn clear(&self) -> Result<()>;
}

/// Rebuild a stored credential, or `None` if it is unusable at `now`.
fn revive(stored: &StoredCredential) -> Option<Credential> {
    match Credential::from_stored(stored) {
        Ok(credential) if credential.verify(now_nanos()) => Some(credential),
        Ok(_) => {
            debug!("Stored credential expired or no longer verifies, discarding");
            None
        }
        Err(e) => {
            warn!("Stored credential is unusable, discarding: {}", e);
            None
        }
    }
}

/// JSON file, replaced atomically on every save
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, credential: &Credential) -> Result<()> {
        let stored = credential.to_stored();
        let bytes = zeroize::Zeroizing::new(serde_json::to_vec(&stored)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes.as_slice()).await?;

        // Owner-only before it becomes visible under the real name
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&temp, &self.path).await?;
        debug!(path = %self.path.display(), "Credential saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Credential>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => zeroize::Zeroizing::new(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RelayError::Storage(e.to_string())),
        };

        let revived = match serde_json::from_slice::<StoredCredential>(&bytes) {
            Ok(stored) => revive(&stored),
            Err(e) => {
                warn!(path = %self.path.display(), "Credential file is corrupt, discarding: {}", e);
                None
            }
        };

        if revived.is_none() {
            self.clear().await?;
        }
        Ok(revived)
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RelayError::Storage(e.to_string())),
        }
    }
}

/// Process-local store
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<StoredCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save(&self, credential: &Credential) -> Result<()> {
        *self.slot.lock().await = Some(credential.to_stored());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Credential>> {
        let mut slot = self.slot.lock().await;
        let revived = slot.as_ref().and_then(revive);
        if revived.is_none() {
            *slot = None;
        }
        Ok(revived)
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<T> {
    async fn save(&self, credential: &Credential) -> Result<()> {
        (**self).save(credential).await
    }

    async fn load(&self) -> Result<Option<Credential>> {
        (**self).load().await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::tests::{credential_with_ttl, HOUR};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credential.json"));
        let credential = credential_with_ttl(HOUR);

        store.save(&credential).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.public_key(), credential.public_key());
        assert_eq!(loaded.chain(), credential.chain());
        assert!(!store.temp_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("credential.json"));
        store.save(&credential_with_ttl(HOUR)).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_file_store_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_discards_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credential.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.load().await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_memory_store_discards_expired() {
        let store = MemoryCredentialStore::new();
        // Expires a millisecond from now
        store.save(&credential_with_ttl(1_000_000)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(store.load().await.unwrap().is_none());
        assert!(store.slot.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_save_load_clear() {
        let store = MemoryCredentialStore::new();
        let credential = credential_with_ttl(HOUR);
        store.save(&credential).await.unwrap();
        assert_eq!(
            store.load().await.unwrap().unwrap().public_key(),
            credential.public_key()
        );

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
