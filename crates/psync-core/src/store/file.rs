use super::{now_millis, RemoteProfileStore};
use crate::error::StoreError;
use async_trait::async_trait;
use psync_model::{ProfileConfig, ProfileError, ProfileId, ProfilePatch};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Profile store persisted as a JSON file
///
/// Each write loads the file, applies the mutation and atomically replaces
/// the file (temp file + rename). A missing file reads as an empty config.
#[derive(Debug)]
pub struct FileProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileProfileStore {
    /// Create store backed by `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ProfileConfig, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProfileConfig::default());
            }
            Err(e) => return Err(StoreError::io_error(&self.path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, config: &ProfileConfig) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(config).map_err(|source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        // Unique per write so concurrent writers never share a temp file.
        let tmp = self.path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io_error(&self.path, e))
    }

    async fn write<T>(
        &self,
        f: impl FnOnce(&mut ProfileConfig) -> Result<T, ProfileError> + Send,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load().await?;
        let value = f(&mut config)?;
        self.save(&config).await?;
        tracing::trace!(path = %self.path.display(), items = config.len(), "profile file written");
        Ok(value)
    }
}

#[async_trait]
impl RemoteProfileStore for FileProfileStore {
    async fn read_all(&self) -> Result<ProfileConfig, StoreError> {
        self.load().await
    }

    async fn insert(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.write(|config| config.insert(item, now_millis()).map(|_| ()))
            .await
    }

    async fn remove(&self, id: ProfileId) -> Result<(), StoreError> {
        self.write(|config| config.remove(&id).map(|_| ())).await
    }

    async fn update(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.write(|config| config.update(&item, now_millis())).await
    }

    async fn replace_all(&self, next: ProfileConfig) -> Result<(), StoreError> {
        self.write(|config| config.replace_all(next)).await
    }

    async fn select_active(&self, id: ProfileId) -> Result<(), StoreError> {
        self.write(|config| config.select(&id)).await
    }
}
