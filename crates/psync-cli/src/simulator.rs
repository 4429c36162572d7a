//! Multi-window simulator
//!
//! Runs several [`ProfileSync`] participants over one shared store and
//! signal bus, drives seeded random mutations through their facades while
//! the store injects faults, then checks that every window converged on a
//! store state with the default profile present once and last.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use psync_core::{
    MemoryProfileStore, ProfileSync, RemoteProfileStore, SignalBus, StoreError, SyncConfig,
};
use psync_model::{Placement, ProfileConfig, ProfileId, ProfilePatch, DEFAULT_PROFILE_ID};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll interval while waiting for windows to agree
const AGREEMENT_POLL: Duration = Duration::from_millis(10);

/// Simulator configuration
#[derive(Debug, Clone)]
pub(crate) struct SimulatorConfig {
    /// Random seed for reproducibility
    pub(crate) seed: u64,
    /// Participants sharing the store
    pub(crate) windows: usize,
    /// Mutations to issue across all windows
    pub(crate) operations: u64,
    /// Probability that a store write fails
    pub(crate) fault_rate: f64,
    /// Runtime configuration of every window
    pub(crate) sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            windows: 3,
            operations: 200,
            fault_rate: 0.1,
            sync: SyncConfig::default(),
        }
    }
}

/// Simulated user action
#[derive(Debug, Clone)]
enum Action {
    Add(ProfileId),
    Remove(ProfileId),
    Rename(ProfileId),
    Switch(ProfileId),
    Shuffle { seed: u64 },
}

/// A violation detected after the workload
#[derive(Debug, Clone)]
pub(crate) enum Violation {
    /// A window never reached a stable snapshot
    Unstable { window: usize, error: String },
    /// The store does not hold the default profile exactly once and last
    DefaultMisplaced { placement: Placement },
    /// The store lists an id twice
    DuplicateId { id: ProfileId },
    /// A window's snapshot differs from the store
    Diverged {
        window: usize,
        expected: Vec<ProfileId>,
        actual: Vec<ProfileId>,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstable { window, error } => write!(f, "window {window} never settled: {error}"),
            Self::DefaultMisplaced { placement } => {
                write!(f, "default profile not last in store: {placement:?}")
            }
            Self::DuplicateId { id } => write!(f, "store lists {id} more than once"),
            Self::Diverged {
                window,
                expected,
                actual,
            } => write!(
                f,
                "window {window} diverged: expected {} items, holds {}",
                expected.len(),
                actual.len()
            ),
        }
    }
}

/// Statistics for simulation
#[derive(Debug, Clone, Default)]
pub(crate) struct SimulatorStats {
    pub(crate) operations_applied: u64,
    pub(crate) operations_rejected: u64,
    pub(crate) faults_injected: u64,
    pub(crate) corrections: u64,
    pub(crate) correction_failures: u64,
    pub(crate) skipped_passes: u64,
    pub(crate) store_reads: u64,
}

/// Final report from simulator
#[derive(Debug, Clone)]
pub(crate) struct SimulatorReport {
    pub(crate) config: SimulatorConfig,
    pub(crate) stats: SimulatorStats,
    pub(crate) violations: Vec<Violation>,
    pub(crate) final_items: Vec<ProfileId>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    pub(crate) fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    pub(crate) fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Profile Sync Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Windows: {}\n", self.config.windows));
        report.push_str(&format!("Fault Rate: {:.2}\n", self.config.fault_rate));
        report.push_str(&format!("Operations Applied: {}\n", self.stats.operations_applied));
        report.push_str(&format!("Operations Rejected: {}\n", self.stats.operations_rejected));
        report.push_str(&format!("Faults Injected: {}\n", self.stats.faults_injected));
        report.push_str(&format!("Corrections Issued: {}\n", self.stats.corrections));
        report.push_str(&format!("Corrections Failed: {}\n", self.stats.correction_failures));
        report.push_str(&format!("Passes Skipped: {}\n", self.stats.skipped_passes));
        report.push_str(&format!("Store Reads: {}\n", self.stats.store_reads));
        report.push_str(&format!("Final Items: {}\n", self.final_items.len()));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Memory store that fails writes at random, before or after committing
#[derive(Debug)]
struct FlakyStore {
    inner: MemoryProfileStore,
    rng: Mutex<StdRng>,
    fault_rate: f64,
    calm: AtomicBool,
    faults: AtomicU64,
}

/// Where an injected fault lands relative to the write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    BeforeCommit,
    AfterCommit,
}

impl FlakyStore {
    fn new(seed: u64, fault_rate: f64) -> Self {
        Self {
            inner: MemoryProfileStore::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            fault_rate,
            calm: AtomicBool::new(false),
            faults: AtomicU64::new(0),
        }
    }

    /// Stop injecting faults
    fn calm_down(&self) {
        self.calm.store(true, Ordering::SeqCst);
    }

    fn roll(&self) -> Option<Fault> {
        if self.calm.load(Ordering::SeqCst) {
            return None;
        }
        let mut rng = self.rng.lock();
        if !rng.random_bool(self.fault_rate) {
            return None;
        }
        self.faults.fetch_add(1, Ordering::SeqCst);
        Some(if rng.random_bool(0.5) {
            Fault::BeforeCommit
        } else {
            Fault::AfterCommit
        })
    }

    async fn write<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: std::future::Future<Output = Result<(), StoreError>> + Send,
    {
        match self.roll() {
            Some(Fault::BeforeCommit) => Err(StoreError::Unavailable("injected fault".into())),
            Some(Fault::AfterCommit) => {
                apply.await?;
                Err(StoreError::Timeout)
            }
            None => apply.await,
        }
    }
}

#[async_trait]
impl RemoteProfileStore for FlakyStore {
    async fn read_all(&self) -> Result<ProfileConfig, StoreError> {
        self.inner.read_all().await
    }

    async fn insert(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.write(self.inner.insert(item)).await
    }

    async fn remove(&self, id: ProfileId) -> Result<(), StoreError> {
        self.write(self.inner.remove(id)).await
    }

    async fn update(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.write(self.inner.update(item)).await
    }

    async fn replace_all(&self, config: ProfileConfig) -> Result<(), StoreError> {
        self.write(self.inner.replace_all(config)).await
    }

    async fn select_active(&self, id: ProfileId) -> Result<(), StoreError> {
        self.write(self.inner.select_active(id)).await
    }
}

/// Run the profile sync simulator
///
/// # Errors
/// Fails on an invalid configuration or if a window cannot start.
pub(crate) async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport> {
    ensure!(config.windows > 0, "at least one window is required");
    ensure!(
        (0.0..=1.0).contains(&config.fault_rate),
        "fault rate must be within 0..=1, got {}",
        config.fault_rate
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let store = Arc::new(FlakyStore::new(rng.random(), config.fault_rate));
    let bus = SignalBus::new();
    let windows: Vec<ProfileSync> = (0..config.windows)
        .map(|_| ProfileSync::new(store.clone(), Arc::new(bus.clone()), config.sync.clone()))
        .collect();

    for window in &windows {
        window.start().await?;
    }

    let mut stats = SimulatorStats::default();
    let mut issued = 0;
    let mut next_id = 0u64;
    while issued < config.operations {
        // A burst of concurrent actions, at most one per window.
        let burst = (rng.random_range(1..=windows.len()) as u64).min(config.operations - issued);
        let mut batch = Vec::new();
        for _ in 0..burst {
            let window = &windows[rng.random_range(0..windows.len())];
            let known = known_ids(window).await;
            let action = pick_action(&mut rng, &known, &mut next_id);
            batch.push(perform(window, action));
        }
        issued += batch.len() as u64;

        for outcome in join_all(batch).await {
            if outcome {
                stats.operations_applied += 1;
            } else {
                stats.operations_rejected += 1;
            }
        }
    }
    tracing::info!(issued, "workload finished, waiting for windows to settle");

    // Corrections that failed wait for the next refresh.
    store.calm_down();
    for window in &windows {
        window.refresh().await;
    }
    let mut violations = Vec::new();
    for (index, window) in windows.iter().enumerate() {
        if let Err(err) = window.settled().await {
            violations.push(Violation::Unstable {
                window: index,
                error: err.to_string(),
            });
        }
    }

    let final_config = store.inner.snapshot();
    check_store(&final_config, &mut violations);
    check_agreement(&windows, &final_config, config.sync.settle_timeout(), &mut violations).await;

    for window in &windows {
        let reconciler = window.reconciler().stats();
        stats.corrections += reconciler.corrections;
        stats.correction_failures += reconciler.failures;
        stats.skipped_passes += reconciler.skipped;
        stats.store_reads += window.cache().stats().reads;
        window.shutdown().await;
    }
    stats.faults_injected = store.faults.load(Ordering::SeqCst);

    Ok(SimulatorReport {
        config,
        stats,
        violations,
        final_items: final_config.ids().cloned().collect(),
    })
}

async fn known_ids(window: &ProfileSync) -> Vec<ProfileId> {
    window
        .current()
        .await
        .config()
        .map(|config| config.ids().cloned().collect())
        .unwrap_or_default()
}

fn pick_action(rng: &mut StdRng, known: &[ProfileId], next_id: &mut u64) -> Action {
    let existing = |rng: &mut StdRng| {
        if known.is_empty() {
            ProfileId::from(DEFAULT_PROFILE_ID)
        } else {
            known[rng.random_range(0..known.len())].clone()
        }
    };

    match rng.random_range(0..10) {
        0..=3 => {
            *next_id += 1;
            Action::Add(ProfileId::new(format!("p{next_id}")))
        }
        4 | 5 => Action::Remove(existing(rng)),
        6 => Action::Rename(existing(rng)),
        7 => Action::Switch(existing(rng)),
        _ => Action::Shuffle { seed: rng.random() },
    }
}

/// Apply `action` through the window's facade; `false` if the store refused it
async fn perform(window: &ProfileSync, action: Action) -> bool {
    let facade = window.facade();
    let result = match action {
        Action::Add(id) => facade.add(ProfilePatch::local().with_id(id)).await,
        Action::Remove(id) => facade.remove(id).await,
        Action::Rename(id) => {
            let name = format!("renamed {id}");
            facade.update(ProfilePatch::new().with_id(id).with_name(name)).await
        }
        Action::Switch(id) => facade.switch_active(id).await,
        Action::Shuffle { seed } => {
            let Some(config) = window.current().await.config().cloned() else {
                return false;
            };
            let mut items = config.items.clone();
            items.shuffle(&mut StdRng::seed_from_u64(seed));
            facade.set_all(config.with_items(items)).await
        }
    };

    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(error = %err, "simulated action rejected");
            false
        }
    }
}

fn check_store(config: &ProfileConfig, violations: &mut Vec<Violation>) {
    let placement = config.placement_of(&ProfileId::from(DEFAULT_PROFILE_ID));
    if placement != Placement::Last {
        violations.push(Violation::DefaultMisplaced { placement });
    }
    if let Some(id) = config.first_duplicate() {
        violations.push(Violation::DuplicateId { id: id.clone() });
    }
}

async fn check_agreement(
    windows: &[ProfileSync],
    expected: &ProfileConfig,
    timeout: Duration,
    violations: &mut Vec<Violation>,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    for (index, window) in windows.iter().enumerate() {
        loop {
            let actual = window.snapshot();
            if actual.as_deref() == Some(expected) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                violations.push(Violation::Diverged {
                    window: index,
                    expected: expected.ids().cloned().collect(),
                    actual: actual
                        .map(|config| config.ids().cloned().collect())
                        .unwrap_or_default(),
                });
                break;
            }
            tokio::time::sleep(AGREEMENT_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(seed: u64, fault_rate: f64) -> SimulatorConfig {
        SimulatorConfig {
            seed,
            windows: 3,
            operations: 60,
            fault_rate,
            sync: SyncConfig::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fault_free_run_passes() {
        let report = run_simulator(quick(7, 0.0)).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.faults_injected, 0);
        assert_eq!(
            report.final_items.last().map(ProfileId::as_str),
            Some(DEFAULT_PROFILE_ID)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn faulty_run_still_converges() {
        let report = run_simulator(quick(11, 0.3)).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.faults_injected > 0);
    }

    #[tokio::test]
    async fn rejects_invalid_fault_rate() {
        assert!(run_simulator(quick(1, 1.5)).await.is_err());
    }

    #[test]
    fn report_lists_violations() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            violations: vec![Violation::DuplicateId {
                id: ProfileId::from("a"),
            }],
            final_items: Vec::new(),
        };
        let text = report.generate_text();
        assert!(!report.passed());
        assert!(text.contains("store lists a more than once"));
        assert!(text.contains("Result: FAIL"));
    }
}
