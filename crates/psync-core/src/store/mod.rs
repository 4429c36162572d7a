//! Remote profile store contract
//!
//! The durable profile list lives behind this trait. Callers only ever see
//! it through asynchronous calls; whether a call that returns an error has
//! committed is unknown to the caller.
//!
//! Implementations:
//! - [`MemoryProfileStore`]: in-process, for single-process use and tests
//! - [`FileProfileStore`]: JSON file, shared between processes

mod file;
mod memory;

pub use file::FileProfileStore;
pub use memory::MemoryProfileStore;

use crate::error::StoreError;
use async_trait::async_trait;
use psync_model::{ProfileConfig, ProfileId, ProfilePatch};

/// Durable keyed profile collection plus the active selection
///
/// Inserts append to the end of the list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteProfileStore: Send + Sync {
    /// Read the full snapshot
    async fn read_all(&self) -> Result<ProfileConfig, StoreError>;

    /// Append an item built from a partial description
    async fn insert(&self, item: ProfilePatch) -> Result<(), StoreError>;

    /// Remove an item
    async fn remove(&self, id: ProfileId) -> Result<(), StoreError>;

    /// Merge a partial item into the existing one with the same id
    async fn update(&self, item: ProfilePatch) -> Result<(), StoreError>;

    /// Replace the whole snapshot
    async fn replace_all(&self, config: ProfileConfig) -> Result<(), StoreError>;

    /// Change the active item
    async fn select_active(&self, id: ProfileId) -> Result<(), StoreError>;
}

/// Store-side timestamp in epoch millis
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
