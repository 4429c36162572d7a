//! Cross-process change notification
//!
//! Best-effort broadcast between participants (windows/processes) that each
//! hold their own profile cache:
//! - `publish` is fire-and-forget, with no delivery or ordering guarantee
//! - handlers run at most once per publish they observe
//! - subscriptions are released explicitly or on drop; releasing twice is a no-op

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use ulid::Ulid;

/// Identity of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub Ulid);

impl ProcessId {
    /// Generate new process ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named event channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Profile configuration changed, re-read it
    ProfileConfigUpdated,
    /// Tray/status indicator image regenerated
    TrayIconUpdated,
}

impl Topic {
    /// Wire name of the topic
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProfileConfigUpdated => "profileConfigUpdated",
            Self::TrayIconUpdated => "trayIconUpdated",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Profile state changed at the store
    ProfileConfigUpdated {
        /// Publisher
        origin: ProcessId,
    },
    /// New tray image, rendered by the tray component
    TrayIconUpdated {
        /// Publisher
        origin: ProcessId,
        /// Encoded image
        image: Arc<[u8]>,
    },
}

impl Signal {
    /// Topic this signal is published on
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::ProfileConfigUpdated { .. } => Topic::ProfileConfigUpdated,
            Self::TrayIconUpdated { .. } => Topic::TrayIconUpdated,
        }
    }

    /// Publisher of this signal
    #[must_use]
    pub fn origin(&self) -> ProcessId {
        match self {
            Self::ProfileConfigUpdated { origin } | Self::TrayIconUpdated { origin, .. } => *origin,
        }
    }
}

/// Subscriber callback
pub type SignalHandler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Broadcast channel between participants
pub trait Notifier: Send + Sync {
    /// Broadcast `signal` to current subscribers of its topic
    fn publish(&self, signal: Signal);

    /// Register `handler` for `topic`
    fn subscribe(&self, topic: Topic, handler: SignalHandler) -> Subscription;
}

type Detach = Box<dyn FnOnce() + Send>;

/// Handle to a registered handler
///
/// The handler stays registered until [`Subscription::unsubscribe`] is
/// called or the handle is dropped.
pub struct Subscription {
    id: u64,
    topic: Topic,
    detach: Mutex<Option<Detach>>,
}

impl Subscription {
    /// Create handle that runs `detach` once on release
    pub fn new(id: u64, topic: Topic, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            topic,
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// Subscription id, unique per notifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribed topic
    #[inline]
    #[must_use]
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Whether the handler is still registered
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.detach.lock().is_some()
    }

    /// Release the handler; later calls do nothing
    pub fn unsubscribe(&self) {
        let detach = self.detach.lock().take();
        if let Some(detach) = detach {
            detach();
            tracing::trace!(id = self.id, topic = %self.topic, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct BusInner {
    subscribers: DashMap<u64, (Topic, SignalHandler)>,
    next_id: AtomicU64,
    published: AtomicU64,
}

/// In-process relay between participants
///
/// Cloning shares the same subscriber set. Handlers are invoked on the
/// publishing thread, outside of any internal lock, so a handler may
/// publish or subscribe itself.
#[derive(Clone, Default)]
pub struct SignalBus {
    inner: Arc<BusInner>,
}

impl SignalBus {
    /// Create empty bus
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered handlers across all topics
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Signals published so far
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    fn detach(inner: &Weak<BusInner>, id: u64) {
        if let Some(inner) = inner.upgrade() {
            inner.subscribers.remove(&id);
        }
    }
}

impl Notifier for SignalBus {
    fn publish(&self, signal: Signal) {
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        let topic = signal.topic();
        let handlers: Vec<SignalHandler> = self
            .inner
            .subscribers
            .iter()
            .filter(|entry| entry.value().0 == topic)
            .map(|entry| Arc::clone(&entry.value().1))
            .collect();

        tracing::trace!(%topic, origin = %signal.origin(), receivers = handlers.len(), "signal published");
        for handler in handlers {
            handler(&signal);
        }
    }

    fn subscribe(&self, topic: Topic, handler: SignalHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.insert(id, (topic, handler));

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(id, topic, move || Self::detach(&inner, id))
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}
