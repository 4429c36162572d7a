//! Testing utilities for the profile-sync workspace
//!
//! Shared fixtures and test doubles.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use psync_core::{
    MemoryProfileStore, Notifier, ProfileSync, RemoteProfileStore, Signal, SignalBus,
    SignalHandler, StoreError, Subscription, SyncConfig, Topic,
};
use psync_model::{
    default_profile_item, is_default_profile, ProfileConfig, ProfileId, ProfileItem, ProfilePatch,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

pub use psync_model::DEFAULT_PROFILE_ID as DEFAULT;

/// Generous bound for stabilization in tests
pub const SETTLE: Duration = Duration::from_secs(5);

pub fn local_item(id: &str) -> ProfileItem {
    ProfileItem::from_patch(ProfilePatch::local().with_id(id), 0).unwrap()
}

pub fn local_patch(id: &str) -> ProfilePatch {
    ProfilePatch::local().with_id(id)
}

/// Config listing `ids` in order; [`DEFAULT`] becomes the bundled default item
pub fn config_of(ids: &[&str]) -> ProfileConfig {
    let items = ids
        .iter()
        .map(|id| {
            if is_default_profile(&ProfileId::from(*id)) {
                default_profile_item(0)
            } else {
                local_item(id)
            }
        })
        .collect();
    ProfileConfig::new(items)
}

pub fn ids(config: &ProfileConfig) -> Vec<String> {
    config.ids().map(|id| id.as_str().to_string()).collect()
}

pub fn default_count(config: &ProfileConfig) -> usize {
    config.ids().filter(|id| is_default_profile(id)).count()
}

pub fn participant(store: Arc<dyn RemoteProfileStore>, bus: &SignalBus) -> ProfileSync {
    ProfileSync::new(store, Arc::new(bus.clone()), SyncConfig::new())
}

/// Poll `check` until it holds or `within` elapses
pub async fn eventually<F: FnMut() -> bool>(mut check: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Store operation, as recorded by [`ScriptedStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ReadAll,
    Insert,
    Remove,
    Update,
    ReplaceAll,
    SelectActive,
}

impl StoreOp {
    pub fn is_write(self) -> bool {
        !matches!(self, Self::ReadAll)
    }
}

/// Injected failure for the next matching call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail without touching the store
    Unavailable,
    /// Apply the write, then report a timeout
    TimeoutAfterCommit,
}

/// Blocks writes until released
#[derive(Debug)]
pub struct WriteGate {
    permits: Semaphore,
    arrived: watch::Sender<usize>,
}

impl WriteGate {
    fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
            arrived: watch::channel(0).0,
        }
    }

    /// Let `n` blocked or future writes through
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// Let every write through from now on
    pub fn open(&self) {
        self.permits.close();
    }

    /// Writes that reached the gate so far
    pub fn arrived(&self) -> usize {
        *self.arrived.borrow()
    }

    /// Wait until `n` writes reached the gate
    pub async fn wait_for_arrivals(&self, n: usize) {
        let mut rx = self.arrived.subscribe();
        let _ = rx.wait_for(|arrived| *arrived >= n).await;
    }

    async fn pass(&self) {
        self.arrived.send_modify(|arrived| *arrived += 1);
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Memory store with a call log, fault injection and an optional write gate
#[derive(Debug, Default)]
pub struct ScriptedStore {
    inner: MemoryProfileStore,
    calls: Mutex<Vec<StoreOp>>,
    faults: Mutex<VecDeque<(StoreOp, Fault)>>,
    write_fault: Mutex<Option<Fault>>,
    gate: Option<Arc<WriteGate>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ProfileConfig) -> Self {
        Self {
            inner: MemoryProfileStore::with_config(config),
            ..Self::default()
        }
    }

    /// Gate every write; the returned handle releases them
    pub fn gated(mut self) -> (Self, Arc<WriteGate>) {
        let gate = Arc::new(WriteGate::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Fail the next call of `op`
    pub fn fail_next(&self, op: StoreOp, fault: Fault) {
        self.faults.lock().push_back((op, fault));
    }

    /// Fail every write with `fault` until called again with `None`
    pub fn fail_writes(&self, fault: Option<Fault>) {
        *self.write_fault.lock() = fault;
    }

    pub fn snapshot(&self) -> ProfileConfig {
        self.inner.snapshot()
    }

    pub fn calls(&self) -> Vec<StoreOp> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: StoreOp) -> usize {
        self.calls.lock().iter().filter(|c| **c == op).count()
    }

    pub fn write_calls(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_write()).count()
    }

    fn take_fault(&self, op: StoreOp) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let index = faults.iter().position(|(o, _)| *o == op)?;
        faults.remove(index).map(|(_, fault)| fault)
    }

    async fn call<F>(&self, op: StoreOp, apply: F) -> Result<(), StoreError>
    where
        F: std::future::Future<Output = Result<(), StoreError>> + Send,
    {
        self.calls.lock().push(op);
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        let fault = self.take_fault(op).or(*self.write_fault.lock());
        match fault {
            Some(Fault::Unavailable) => Err(StoreError::Unavailable(format!("{op:?} rejected"))),
            Some(Fault::TimeoutAfterCommit) => {
                apply.await?;
                Err(StoreError::Timeout)
            }
            None => apply.await,
        }
    }
}

#[async_trait]
impl RemoteProfileStore for ScriptedStore {
    async fn read_all(&self) -> Result<ProfileConfig, StoreError> {
        self.calls.lock().push(StoreOp::ReadAll);
        match self.take_fault(StoreOp::ReadAll) {
            Some(_) => Err(StoreError::Unavailable("read rejected".into())),
            None => self.inner.read_all().await,
        }
    }

    async fn insert(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.call(StoreOp::Insert, self.inner.insert(item)).await
    }

    async fn remove(&self, id: ProfileId) -> Result<(), StoreError> {
        self.call(StoreOp::Remove, self.inner.remove(id)).await
    }

    async fn update(&self, item: ProfilePatch) -> Result<(), StoreError> {
        self.call(StoreOp::Update, self.inner.update(item)).await
    }

    async fn replace_all(&self, config: ProfileConfig) -> Result<(), StoreError> {
        self.call(StoreOp::ReplaceAll, self.inner.replace_all(config))
            .await
    }

    async fn select_active(&self, id: ProfileId) -> Result<(), StoreError> {
        self.call(StoreOp::SelectActive, self.inner.select_active(id))
            .await
    }
}

/// Notifier that records every published signal before relaying it
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    bus: SignalBus,
    log: Arc<Mutex<Vec<Signal>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Signal> {
        self.log.lock().clone()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.log.lock().iter().filter(|s| s.topic() == topic).count()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, signal: Signal) {
        self.log.lock().push(signal.clone());
        self.bus.publish(signal);
    }

    fn subscribe(&self, topic: Topic, handler: SignalHandler) -> Subscription {
        self.bus.subscribe(topic, handler)
    }
}
