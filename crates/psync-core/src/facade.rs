//! Mutation facade
//!
//! The single entry point for changing profile state. Every operation:
//! 1. awaits the remote store call
//! 2. invalidates the local cache, whether the call succeeded or not
//! 3. publishes one `ProfileConfigUpdated` signal, whether the call succeeded or not
//! 4. returns the store result to the caller
//!
//! A call that fails after committing (e.g. a transport timeout) therefore
//! still converges the local view to the store.
//!
//! Default profile corrections use [`ProfileFacade::correct_add`] and
//! [`ProfileFacade::correct_set_all`] instead, which refresh and announce only
//! when the store call succeeds. A failed correction is only logged; the next
//! invalidation from elsewhere retries it.

use crate::cache::ProfileCache;
use crate::error::{StoreError, SyncError};
use crate::notifier::{Notifier, ProcessId, Signal};
use crate::store::RemoteProfileStore;
use psync_model::{ProfileConfig, ProfileId, ProfilePatch};
use std::sync::Arc;

/// Facade operation, used in logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Replace the whole config
    SetAll,
    /// Append an item
    Add,
    /// Remove an item
    Remove,
    /// Merge into an item
    Update,
    /// Change the active item
    SwitchActive,
}

impl MutationKind {
    /// Operation name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetAll => "set-all",
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::SwitchActive => "switch-active",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point for all profile mutations of one participant
pub struct ProfileFacade {
    origin: ProcessId,
    store: Arc<dyn RemoteProfileStore>,
    cache: Arc<ProfileCache>,
    notifier: Arc<dyn Notifier>,
}

impl ProfileFacade {
    /// Create facade publishing as `origin`
    #[must_use]
    pub fn new(
        origin: ProcessId,
        store: Arc<dyn RemoteProfileStore>,
        cache: Arc<ProfileCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            origin,
            store,
            cache,
            notifier,
        }
    }

    /// Participant this facade publishes as
    #[inline]
    #[must_use]
    pub fn origin(&self) -> ProcessId {
        self.origin
    }

    /// Cache refreshed after every mutation
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<ProfileCache> {
        &self.cache
    }

    /// Replace the whole profile config
    ///
    /// # Errors
    /// - `SyncError::Mutation` if the store call fails
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.origin, items = config.len()))]
    pub async fn set_all(&self, config: ProfileConfig) -> Result<(), SyncError> {
        let cleanup = self.arm(MutationKind::SetAll);
        let result = self.store.replace_all(config).await;
        cleanup.settle(result).await
    }

    /// Append a profile built from a partial description
    ///
    /// # Errors
    /// - `SyncError::Mutation` if the store call fails
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.origin, id = ?item.id))]
    pub async fn add(&self, item: ProfilePatch) -> Result<(), SyncError> {
        let cleanup = self.arm(MutationKind::Add);
        let result = self.store.insert(item).await;
        cleanup.settle(result).await
    }

    /// Remove a profile
    ///
    /// # Errors
    /// - `SyncError::Mutation` if the store call fails
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.origin, %id))]
    pub async fn remove(&self, id: ProfileId) -> Result<(), SyncError> {
        let cleanup = self.arm(MutationKind::Remove);
        let result = self.store.remove(id).await;
        cleanup.settle(result).await
    }

    /// Merge changed fields into an existing profile
    ///
    /// # Errors
    /// - `SyncError::Mutation` if the store call fails
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.origin, id = ?item.id))]
    pub async fn update(&self, item: ProfilePatch) -> Result<(), SyncError> {
        let cleanup = self.arm(MutationKind::Update);
        let result = self.store.update(item).await;
        cleanup.settle(result).await
    }

    /// Make a profile the active one
    ///
    /// # Errors
    /// - `SyncError::Mutation` if the store call fails
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.origin, %id))]
    pub async fn switch_active(&self, id: ProfileId) -> Result<(), SyncError> {
        let cleanup = self.arm(MutationKind::SwitchActive);
        let result = self.store.select_active(id).await;
        cleanup.settle(result).await
    }

    /// Append an item as a default profile correction
    ///
    /// # Errors
    /// - `SyncError::Mutation` if the store call fails; nothing is refreshed or announced
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.origin, id = ?item.id))]
    pub(crate) async fn correct_add(&self, item: ProfilePatch) -> Result<(), SyncError> {
        let cleanup = self.arm_with(MutationKind::Add, Refresh::OnSuccess);
        let result = self.store.insert(item).await;
        cleanup.settle(result).await
    }

    /// Replace the whole config as a default profile correction
    ///
    /// # Errors
    /// - `SyncError::Mutation` if the store call fails; nothing is refreshed or announced
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.origin, items = config.len()))]
    pub(crate) async fn correct_set_all(&self, config: ProfileConfig) -> Result<(), SyncError> {
        let cleanup = self.arm_with(MutationKind::SetAll, Refresh::OnSuccess);
        let result = self.store.replace_all(config).await;
        cleanup.settle(result).await
    }

    fn arm(&self, kind: MutationKind) -> Cleanup<'_> {
        self.arm_with(kind, Refresh::Always)
    }

    fn arm_with(&self, kind: MutationKind, refresh: Refresh) -> Cleanup<'_> {
        Cleanup {
            facade: self,
            kind,
            refresh,
            armed: true,
        }
    }

    fn announce(&self) {
        self.notifier.publish(Signal::ProfileConfigUpdated {
            origin: self.origin,
        });
    }
}

impl std::fmt::Debug for ProfileFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileFacade")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Which store results trigger the refresh and announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    Always,
    OnSuccess,
}

/// Refresh-and-announce obligation armed before each store call
///
/// `settle` discharges it on the result paths its [`Refresh`] policy covers.
/// If the mutation future is dropped before the announcement, `Drop` still
/// announces the change and schedules the cache refresh on the current
/// runtime; the store outcome is unknown at that point.
struct Cleanup<'a> {
    facade: &'a ProfileFacade,
    kind: MutationKind,
    refresh: Refresh,
    armed: bool,
}

impl Cleanup<'_> {
    async fn settle(mut self, result: Result<(), StoreError>) -> Result<(), SyncError> {
        let kind = self.kind;
        match &result {
            Ok(()) => tracing::debug!(operation = %kind, "profile mutation applied"),
            Err(err) => tracing::warn!(operation = %kind, error = %err, "profile mutation failed"),
        }

        if result.is_ok() || self.refresh == Refresh::Always {
            self.facade.cache.invalidate().await;
            self.facade.announce();
        }
        self.armed = false;
        result.map_err(|source| SyncError::Mutation { kind, source })
    }
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(operation = %self.kind, "profile mutation dropped before completion");
        let cache = Arc::clone(&self.facade.cache);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                cache.invalidate().await;
            });
        }
        self.facade.announce();
    }
}
