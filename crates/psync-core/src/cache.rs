//! Local profile cache
//!
//! An in-memory mirror of the store's current snapshot:
//! - `invalidate` re-reads the store and publishes the result
//! - `revalidate` joins the load of the current generation, so concurrent
//!   readers share one store read (moka)
//! - results older than the last published one are dropped (most recent wins)
//! - a failed read is retained until the next `invalidate`; nothing retries on its own
//!
//! Observers follow the cache through [`ProfileCache::subscribe`], a watch
//! channel that always holds the latest [`CacheView`].

use crate::error::StoreError;
use crate::store::RemoteProfileStore;
use moka::future::Cache;
use psync_model::ProfileConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// What the cache currently holds
#[derive(Debug, Clone)]
pub enum CacheState {
    /// Nothing has been read yet
    Pending,
    /// Latest successfully read snapshot
    Ready(Arc<ProfileConfig>),
    /// Latest read failed
    Failed(Arc<StoreError>),
}

impl CacheState {
    /// Snapshot, if ready
    #[inline]
    #[must_use]
    pub fn config(&self) -> Option<&Arc<ProfileConfig>> {
        match self {
            Self::Ready(config) => Some(config),
            _ => None,
        }
    }

    /// Whether a snapshot is available
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Read error, if failed
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&Arc<StoreError>> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Published cache state tagged with the load generation that produced it
#[derive(Debug, Clone)]
pub struct CacheView {
    /// Load generation, increases with every `invalidate`
    pub generation: u64,
    /// Cache state
    pub state: CacheState,
}

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Store reads issued
    pub reads: u64,
    /// Store reads that failed
    pub failures: u64,
    /// Generation of the published state
    pub generation: u64,
}

/// Revalidate-on-demand mirror of the store snapshot
pub struct ProfileCache {
    store: Arc<dyn RemoteProfileStore>,
    loads: Cache<u64, Arc<ProfileConfig>>,
    generation: AtomicU64,
    view: watch::Sender<CacheView>,
    reads: AtomicU64,
    failures: AtomicU64,
}

impl ProfileCache {
    /// Create cache over `store`, retaining up to `capacity` loaded snapshots
    #[must_use]
    pub fn new(store: Arc<dyn RemoteProfileStore>, capacity: u64) -> Self {
        let (view, _) = watch::channel(CacheView {
            generation: 0,
            state: CacheState::Pending,
        });
        Self {
            store,
            loads: Cache::new(capacity.max(1)),
            generation: AtomicU64::new(0),
            view,
            reads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn read(&self) -> CacheState {
        self.view.borrow().state.clone()
    }

    /// Current state with its generation
    #[inline]
    #[must_use]
    pub fn view(&self) -> CacheView {
        self.view.borrow().clone()
    }

    /// Current snapshot, if ready
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<ProfileConfig>> {
        self.read().config().cloned()
    }

    /// Snapshot-changed events
    ///
    /// The receiver starts with the current view marked as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CacheView> {
        self.view.subscribe()
    }

    /// Discard the current snapshot and re-read the store
    ///
    /// Returns the state this call produced; it is only published if no
    /// newer generation has been published in the meantime.
    pub async fn invalidate(&self) -> CacheState {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.load(generation).await
    }

    /// Ensure the current generation is loaded
    ///
    /// Joins a load already in flight for the current generation, so
    /// concurrent callers share one store read. A ready snapshot is returned
    /// without reading again, and a failed read stays failed until the next
    /// `invalidate`.
    pub async fn revalidate(&self) -> CacheState {
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let view = self.view.borrow();
            if view.generation == generation && view.state.error().is_some() {
                return view.state.clone();
            }
        }
        self.load(generation).await
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            reads: self.reads.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            generation: self.view.borrow().generation,
        }
    }

    async fn load(&self, generation: u64) -> CacheState {
        let store = Arc::clone(&self.store);
        let reads = &self.reads;
        let result = self
            .loads
            .try_get_with(generation, async move {
                reads.fetch_add(1, Ordering::SeqCst);
                store.read_all().await.map(Arc::new)
            })
            .await;

        let state = match result {
            Ok(config) => {
                tracing::debug!(generation, items = config.len(), "profile snapshot loaded");
                CacheState::Ready(config)
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(generation, error = %err, "profile snapshot read failed");
                CacheState::Failed(err)
            }
        };

        self.publish(generation, state.clone());
        state
    }

    fn publish(&self, generation: u64, state: CacheState) -> bool {
        self.view.send_if_modified(|view| {
            let newer = generation > view.generation;
            let fills_current = generation == view.generation && !view.state.is_ready();
            if !(newer || fills_current) {
                tracing::trace!(generation, published = view.generation, "stale snapshot dropped");
                return false;
            }
            *view = CacheView { generation, state };
            true
        })
    }
}

impl std::fmt::Debug for ProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCache")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
