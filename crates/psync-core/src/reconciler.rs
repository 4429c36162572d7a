//! Default profile reconciliation
//!
//! Keeps the bundled default profile present exactly once and in the last
//! position. The reconciler watches cache snapshots and issues corrections
//! through the [`ProfileFacade`]; the snapshot produced by its own correction
//! comes back through the same channel and confirms the fix, so a genuine
//! external change costs at most one corrective and one confirming pass.
//!
//! A failed correction produces no snapshot and no signal. It is retried
//! when something else invalidates the cache.
//!
//! # State
//!
//! ```text
//! idle ──snapshot──▶ reconciling ──correction resolved──▶ idle
//!   ▲                    │
//!   └──snapshot while reconciling: skipped─┘
//! ```

use crate::cache::{CacheState, CacheView};
use crate::facade::ProfileFacade;
use parking_lot::Mutex;
use psync_model::{
    default_profile, Placement, ProfileConfig, ProfileId, ProfileItem, DEFAULT_PROFILE_ID,
    DEFAULT_PROFILE_REVISION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Correction needed to restore the default profile invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    /// Invariant holds
    None,
    /// Default profile is missing; append it
    Insert,
    /// Default profile is misplaced or duplicated; replace the list with this one
    Reposition(Vec<ProfileItem>),
}

/// Compute the correction for `config`, treating `default_id` as the sentinel
///
/// Duplicates collapse to the first occurrence, re-appended at the end;
/// all other items keep their relative order.
#[must_use]
pub fn plan_correction(config: &ProfileConfig, default_id: &ProfileId) -> Correction {
    match config.placement_of(default_id) {
        Placement::Last => Correction::None,
        Placement::Missing => Correction::Insert,
        Placement::Misplaced { .. } | Placement::Duplicated { .. } => {
            let mut sentinel = None;
            let mut items = Vec::with_capacity(config.len());
            for item in &config.items {
                if &item.id == default_id {
                    if sentinel.is_none() {
                        sentinel = Some(item.clone());
                    }
                } else {
                    items.push(item.clone());
                }
            }
            items.extend(sentinel);
            Correction::Reposition(items)
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another pass was in flight
    Skipped,
    /// Invariant already held; nothing issued
    Satisfied,
    /// Default profile appended
    Inserted,
    /// List rewritten with the default profile last
    Repositioned,
    /// Correction issued but the store call failed
    Failed(String),
}

impl ReconcileOutcome {
    /// Whether this pass issued a facade call
    #[inline]
    #[must_use]
    pub fn issued_correction(&self) -> bool {
        matches!(self, Self::Inserted | Self::Repositioned | Self::Failed(_))
    }
}

/// Reconciler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Passes that evaluated a snapshot
    pub passes: u64,
    /// Passes skipped because one was in flight
    pub skipped: u64,
    /// Facade calls issued
    pub corrections: u64,
    /// Facade calls that failed
    pub failures: u64,
}

/// Default profile invariant enforcer
pub struct Reconciler {
    facade: Arc<ProfileFacade>,
    default_id: ProfileId,
    reconciling: AtomicBool,
    stats: Mutex<ReconcilerStats>,
}

impl Reconciler {
    /// Create reconciler issuing corrections through `facade`
    #[must_use]
    pub fn new(facade: Arc<ProfileFacade>) -> Self {
        Self {
            facade,
            default_id: ProfileId::from(DEFAULT_PROFILE_ID),
            reconciling: AtomicBool::new(false),
            stats: Mutex::new(ReconcilerStats::default()),
        }
    }

    /// Whether a pass is in flight
    #[inline]
    #[must_use]
    pub fn is_reconciling(&self) -> bool {
        self.reconciling.load(Ordering::Acquire)
    }

    /// Get reconciler statistics
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        *self.stats.lock()
    }

    /// Evaluate `config` and issue at most one correction
    ///
    /// Returns `Skipped` without looking at `config` if another pass holds
    /// the guard. Correction failures are logged and reported, never raised;
    /// the next snapshot published by someone else retries.
    pub async fn reconcile(&self, config: &ProfileConfig) -> ReconcileOutcome {
        let Some(_guard) = ReconcileGuard::acquire(&self.reconciling) else {
            self.stats.lock().skipped += 1;
            tracing::debug!("reconciliation in flight, snapshot skipped");
            return ReconcileOutcome::Skipped;
        };
        self.stats.lock().passes += 1;

        let (result, done) = match plan_correction(config, &self.default_id) {
            Correction::None => {
                tracing::trace!(items = config.len(), "default profile in place");
                return ReconcileOutcome::Satisfied;
            }
            Correction::Insert => {
                tracing::info!(
                    revision = DEFAULT_PROFILE_REVISION,
                    items = config.len(),
                    "default profile missing, adding"
                );
                self.stats.lock().corrections += 1;
                (
                    self.facade.correct_add(default_profile()).await,
                    ReconcileOutcome::Inserted,
                )
            }
            Correction::Reposition(items) => {
                tracing::info!(
                    from = ?config.placement_of(&self.default_id),
                    items = items.len(),
                    "default profile misplaced, moving to end"
                );
                self.stats.lock().corrections += 1;
                (
                    self.facade.correct_set_all(config.with_items(items)).await,
                    ReconcileOutcome::Repositioned,
                )
            }
        };

        match result {
            Ok(()) => done,
            Err(err) => {
                self.stats.lock().failures += 1;
                tracing::warn!(error = %err, "default profile correction failed");
                ReconcileOutcome::Failed(err.to_string())
            }
        }
    }

    /// Evaluate every snapshot published on `snapshots` until `shutdown` fires
    ///
    /// Starts with the current snapshot. Snapshots published while a pass
    /// is running collapse to the newest one, which is evaluated next.
    pub async fn run(
        self: Arc<Self>,
        mut snapshots: watch::Receiver<CacheView>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::debug!(origin = %self.facade.origin(), "reconciler started");
        loop {
            let state = snapshots.borrow_and_update().state.clone();
            if let CacheState::Ready(config) = state {
                self.reconcile(&config).await;
            }

            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(origin = %self.facade.origin(), "reconciler stopped");
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("reconciling", &self.is_reconciling())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on the reconciling flag, released on drop
struct ReconcileGuard<'a>(&'a AtomicBool);

impl<'a> ReconcileGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReconcileGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProfileCache;
    use crate::notifier::{ProcessId, SignalBus};
    use crate::store::{MemoryProfileStore, RemoteProfileStore};
    use pretty_assertions::assert_eq;
    use psync_model::{default_profile_item, ProfilePatch};

    fn item(id: &str) -> ProfileItem {
        ProfileItem::from_patch(ProfilePatch::local().with_id(id), 0).unwrap()
    }

    fn ids(items: &[ProfileItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    fn sentinel() -> ProfileId {
        ProfileId::from(DEFAULT_PROFILE_ID)
    }

    fn reconciler_over(store: Arc<MemoryProfileStore>) -> Reconciler {
        let store: Arc<dyn RemoteProfileStore> = store;
        let cache = Arc::new(ProfileCache::new(Arc::clone(&store), 4));
        let facade = ProfileFacade::new(ProcessId::new(), store, cache, Arc::new(SignalBus::new()));
        Reconciler::new(Arc::new(facade))
    }

    #[test]
    fn plan_for_empty_list_is_insert() {
        assert_eq!(plan_correction(&ProfileConfig::default(), &sentinel()), Correction::Insert);
    }

    #[test]
    fn plan_for_last_is_none() {
        let config = ProfileConfig::new(vec![item("a"), default_profile_item(0)]);
        assert_eq!(plan_correction(&config, &sentinel()), Correction::None);
    }

    #[test]
    fn plan_moves_default_to_end_preserving_order() {
        let config = ProfileConfig::new(vec![item("a"), default_profile_item(0), item("b")]);
        let Correction::Reposition(items) = plan_correction(&config, &sentinel()) else {
            panic!("expected reposition");
        };
        assert_eq!(ids(&items), vec!["a", "b", DEFAULT_PROFILE_ID]);
    }

    #[test]
    fn plan_collapses_duplicates() {
        let mut first = default_profile_item(1);
        first.name = "first".into();
        let config = ProfileConfig::new(vec![
            first.clone(),
            item("a"),
            default_profile_item(2),
        ]);

        let Correction::Reposition(items) = plan_correction(&config, &sentinel()) else {
            panic!("expected reposition");
        };
        assert_eq!(ids(&items), vec!["a", DEFAULT_PROFILE_ID]);
        assert_eq!(items[1], first);
    }

    #[tokio::test]
    async fn inserts_missing_default() {
        let store = Arc::new(MemoryProfileStore::new());
        let reconciler = reconciler_over(store.clone());

        let outcome = reconciler.reconcile(&ProfileConfig::default()).await;
        assert_eq!(outcome, ReconcileOutcome::Inserted);

        let config = store.snapshot();
        assert_eq!(ids(&config.items), vec![DEFAULT_PROFILE_ID]);
        assert!(!reconciler.is_reconciling());
    }

    #[tokio::test]
    async fn second_pass_on_stable_snapshot_issues_nothing() {
        let store = Arc::new(MemoryProfileStore::new());
        let reconciler = reconciler_over(store.clone());

        reconciler.reconcile(&store.snapshot()).await;
        let writes = store.write_count();

        assert_eq!(reconciler.reconcile(&store.snapshot()).await, ReconcileOutcome::Satisfied);
        assert_eq!(reconciler.reconcile(&store.snapshot()).await, ReconcileOutcome::Satisfied);
        assert_eq!(store.write_count(), writes);
        assert_eq!(reconciler.stats().corrections, 1);
    }

    #[tokio::test]
    async fn failed_correction_releases_guard() {
        let mut config = ProfileConfig::default();
        config.insert(default_profile(), 0).unwrap();
        // Store already holds the default; the stale empty snapshot makes the insert collide.
        let store = Arc::new(MemoryProfileStore::with_config(config));
        let reconciler = reconciler_over(store.clone());

        let outcome = reconciler.reconcile(&ProfileConfig::default()).await;
        assert!(matches!(outcome, ReconcileOutcome::Failed(_)));
        assert!(!reconciler.is_reconciling());
        assert_eq!(reconciler.stats().failures, 1);
        assert_eq!(store.snapshot().len(), 1);
        // No refresh, so no snapshot to re-trigger the same correction.
        assert_eq!(reconciler.facade.cache().stats().reads, 0);
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = ReconcileGuard::acquire(&flag).unwrap();
        assert!(ReconcileGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(ReconcileGuard::acquire(&flag).is_some());
    }
}
