//! Per-participant wiring
//!
//! [`ProfileSync`] owns one participant's cache, facade and reconciler and
//! connects them to the shared notifier:
//!
//! ```text
//!  other participant ──Signal──▶ listener ──invalidate──▶ ProfileCache
//!                                                           │ snapshot
//!  ProfileFacade ◀──correction── Reconciler ◀───────────────┘
//!       │ store call, invalidate, publish
//!       ▼
//!  RemoteProfileStore / Notifier
//! ```

use crate::cache::{CacheState, ProfileCache};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::facade::ProfileFacade;
use crate::notifier::{Notifier, ProcessId, Signal, Subscription, Topic};
use crate::reconciler::Reconciler;
use crate::store::RemoteProfileStore;
use psync_model::ProfileConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

/// Poll interval while waiting for the reconciler to go idle
const SETTLE_POLL: Duration = Duration::from_millis(10);

/// Live background state of a started instance
struct Running {
    subscription: Subscription,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// One participant's view of the shared profile store
pub struct ProfileSync {
    config: SyncConfig,
    origin: ProcessId,
    notifier: Arc<dyn Notifier>,
    cache: Arc<ProfileCache>,
    facade: Arc<ProfileFacade>,
    reconciler: Arc<Reconciler>,
    running: Mutex<Option<Running>>,
}

impl ProfileSync {
    /// Create an idle participant with a fresh identity
    #[must_use]
    pub fn new(
        store: Arc<dyn RemoteProfileStore>,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
    ) -> Self {
        let origin = ProcessId::new();
        let cache = Arc::new(ProfileCache::new(
            Arc::clone(&store),
            config.snapshot_capacity,
        ));
        let facade = Arc::new(ProfileFacade::new(
            origin,
            store,
            Arc::clone(&cache),
            Arc::clone(&notifier),
        ));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&facade)));

        Self {
            config,
            origin,
            notifier,
            cache,
            facade,
            reconciler,
            running: Mutex::new(None),
        }
    }

    /// Participant identity used on published signals
    #[inline]
    #[must_use]
    pub fn origin(&self) -> ProcessId {
        self.origin
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Mutation entry point
    #[inline]
    #[must_use]
    pub fn facade(&self) -> &ProfileFacade {
        &self.facade
    }

    /// Local cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ProfileCache {
        &self.cache
    }

    /// Default profile reconciler
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Current snapshot, if loaded
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<ProfileConfig>> {
        self.cache.snapshot()
    }

    /// Current state, loading the snapshot if this generation has not been read
    ///
    /// Concurrent callers, and a refresh already in flight, share one store read.
    pub async fn current(&self) -> CacheState {
        self.cache.revalidate().await
    }

    /// Re-read the store, as after any external change
    pub async fn refresh(&self) -> CacheState {
        self.cache.invalidate().await
    }

    /// Whether background tasks are running
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Subscribe to change signals, start background tasks, load the first snapshot
    ///
    /// Returns the state of the initial load; a failed load is not an error
    /// here, it stays in the cache until the next invalidation.
    ///
    /// # Errors
    /// - `SyncError::AlreadyRunning` if already started
    pub async fn start(&self) -> Result<CacheState, SyncError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let remote_changed = Arc::new(Notify::new());
        let subscription = self.subscribe_remote_changes(Arc::clone(&remote_changed));

        let mut tasks = vec![tokio::spawn(listen_for_changes(
            Arc::clone(&self.cache),
            remote_changed,
            shutdown_rx.clone(),
        ))];
        if self.config.ensure_default_profile {
            tasks.push(tokio::spawn(
                Arc::clone(&self.reconciler).run(self.cache.subscribe(), shutdown_rx),
            ));
        }

        *running = Some(Running {
            subscription,
            shutdown,
            tasks,
        });
        drop(running);

        let state = self.cache.invalidate().await;
        tracing::info!(
            origin = %self.origin,
            ready = state.is_ready(),
            reconcile = self.config.ensure_default_profile,
            "profile sync started"
        );
        Ok(state)
    }

    /// Unsubscribe and stop background tasks; calling it again does nothing
    ///
    /// In-flight store calls are awaited, never cancelled.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.subscription.unsubscribe();
        running.shutdown.send_replace(true);
        for task in running.tasks {
            if let Err(err) = task.await {
                tracing::warn!(origin = %self.origin, error = %err, "background task ended abnormally");
            }
        }
        tracing::info!(origin = %self.origin, "profile sync stopped");
    }

    /// Wait until the snapshot is loaded, the default profile invariant holds
    /// and no correction is in flight
    ///
    /// With reconciliation disabled, any loaded snapshot is stable.
    ///
    /// # Errors
    /// - `SyncError::Timeout` if that does not happen within `timeout`
    pub async fn wait_until_stable(
        &self,
        timeout: Duration,
    ) -> Result<Arc<ProfileConfig>, SyncError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut snapshots = self.cache.subscribe();

        loop {
            let state = snapshots.borrow_and_update().state.clone();
            if let CacheState::Ready(config) = state {
                if self.is_stable(&config) {
                    return Ok(config);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(SyncError::Timeout {
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            // A change wakes us early; the poll catches the reconciler going idle.
            let _ = tokio::time::timeout(SETTLE_POLL, snapshots.changed()).await;
        }
    }

    /// [`ProfileSync::wait_until_stable`] with the configured timeout
    ///
    /// # Errors
    /// - `SyncError::Timeout` after `settle_timeout_ms`
    pub async fn settled(&self) -> Result<Arc<ProfileConfig>, SyncError> {
        self.wait_until_stable(self.config.settle_timeout()).await
    }

    fn is_stable(&self, config: &ProfileConfig) -> bool {
        !self.config.ensure_default_profile
            || (config.satisfies_default_invariant() && !self.reconciler.is_reconciling())
    }

    fn subscribe_remote_changes(&self, wake: Arc<Notify>) -> Subscription {
        let origin = self.origin;
        let ignore_own = self.config.ignore_own_signals;
        self.notifier.subscribe(
            Topic::ProfileConfigUpdated,
            Arc::new(move |signal: &Signal| {
                if ignore_own && signal.origin() == origin {
                    return;
                }
                wake.notify_one();
            }),
        )
    }
}

impl std::fmt::Debug for ProfileSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileSync")
            .field("origin", &self.origin)
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Refresh the cache whenever another participant announces a change
///
/// Signals that arrive during a refresh collapse into one follow-up refresh.
async fn listen_for_changes(
    cache: Arc<ProfileCache>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            () = wake.notified() => {
                tracing::debug!("remote profile change, refreshing");
                cache.invalidate().await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::SignalBus;
    use crate::store::MemoryProfileStore;
    use psync_model::ProfilePatch;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn start_inserts_default_profile() {
        let store = Arc::new(MemoryProfileStore::new());
        let sync = ProfileSync::new(store.clone(), Arc::new(SignalBus::new()), SyncConfig::new());

        sync.start().await.unwrap();
        let config = sync.wait_until_stable(WAIT).await.unwrap();

        assert!(config.satisfies_default_invariant());
        assert!(store.snapshot().satisfies_default_invariant());
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let sync = ProfileSync::new(
            Arc::new(MemoryProfileStore::new()),
            Arc::new(SignalBus::new()),
            SyncConfig::new(),
        );
        sync.start().await.unwrap();
        assert!(matches!(sync.start().await, Err(SyncError::AlreadyRunning)));

        sync.shutdown().await;
        sync.shutdown().await;
        assert!(!sync.is_running().await);
    }

    #[tokio::test]
    async fn shutdown_releases_subscription() {
        let bus = SignalBus::new();
        let sync = ProfileSync::new(
            Arc::new(MemoryProfileStore::new()),
            Arc::new(bus.clone()),
            SyncConfig::new(),
        );
        sync.start().await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        sync.shutdown().await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn reconciliation_can_be_disabled() {
        let store = Arc::new(MemoryProfileStore::new());
        let sync = ProfileSync::new(
            store.clone(),
            Arc::new(SignalBus::new()),
            SyncConfig::new().with_default_profile(false),
        );
        sync.start().await.unwrap();
        sync.facade()
            .add(ProfilePatch::local().with_id("a"))
            .await
            .unwrap();

        let config = sync.wait_until_stable(WAIT).await.unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(sync.reconciler().stats().passes, 0);
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn times_out_when_store_is_unreadable() {
        use crate::error::StoreError;
        use crate::store::MockRemoteProfileStore;

        let mut store = MockRemoteProfileStore::new();
        store
            .expect_read_all()
            .returning(|| Err(StoreError::Unavailable("down".into())));
        let sync = ProfileSync::new(Arc::new(store), Arc::new(SignalBus::new()), SyncConfig::new());

        let state = sync.start().await.unwrap();
        assert!(state.error().is_some());

        let err = sync
            .wait_until_stable(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { waited_ms: 50 }));
        sync.shutdown().await;
    }
}
