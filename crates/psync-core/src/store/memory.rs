use super::{now_millis, RemoteProfileStore};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use psync_model::{ProfileConfig, ProfileError, ProfileId, ProfilePatch};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process profile store
///
/// Shared between participants through an `Arc`; every write is applied
/// under one lock, so concurrent writes are serialized.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    config: RwLock<ProfileConfig>,
    writes: AtomicU64,
}

impl MemoryProfileStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store holding `config`
    #[must_use]
    pub fn with_config(config: ProfileConfig) -> Self {
        Self {
            config: RwLock::new(config),
            writes: AtomicU64::new(0),
        }
    }

    /// Current contents, without going through the async contract
    #[must_use]
    pub fn snapshot(&self) -> ProfileConfig {
        self.config.read().clone()
    }

    /// Number of committed writes
    #[inline]
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut ProfileConfig) -> Result<T, ProfileError>,
    ) -> Result<T, StoreError> {
        let mut config = self.config.write();
        let value = f(&mut config)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }
}

#[async_trait]
impl RemoteProfileStore for MemoryProfileStore {
    async fn read_all(&self) -> Result<ProfileConfig, StoreError> {
        Ok(self.snapshot())
    }

    async fn insert(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.write(|config| config.insert(item, now_millis()).map(|_| ()))
    }

    async fn remove(&self, id: ProfileId) -> Result<(), StoreError> {
        self.write(|config| config.remove(&id).map(|_| ()))
    }

    async fn update(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.write(|config| config.update(&item, now_millis()))
    }

    async fn replace_all(&self, next: ProfileConfig) -> Result<(), StoreError> {
        self.write(|config| config.replace_all(next))
    }

    async fn select_active(&self, id: ProfileId) -> Result<(), StoreError> {
        self.write(|config| config.select(&id))
    }
}
