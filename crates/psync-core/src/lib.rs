//! Profile synchronization core
//!
//! Keeps each participant's cached profile list consistent with a shared,
//! asynchronously reachable profile store.
//!
//! # Components
//!
//! - **Store** ([`RemoteProfileStore`]): the durable profile list, a black box
//! - **Cache** ([`ProfileCache`]): revalidate-on-demand mirror of the store
//! - **Notifier** ([`Notifier`], [`SignalBus`]): best-effort change broadcast
//! - **Facade** ([`ProfileFacade`]): every mutation goes through here and
//!   refreshes the cache and announces the change; user mutations do so
//!   even when the store call fails
//! - **Reconciler** ([`Reconciler`]): keeps the default profile present once
//!   and last
//! - **Runtime** ([`ProfileSync`]): wires the above for one participant
//!
//! # Example
//!
//! ```rust,ignore
//! use psync_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), SyncError> {
//! let store = Arc::new(MemoryProfileStore::new());
//! let bus = Arc::new(SignalBus::new());
//!
//! let window = ProfileSync::new(store, bus, SyncConfig::new());
//! window.start().await?;
//! window.facade().add(ProfilePatch::remote("https://example.com/sub")).await?;
//!
//! let config = window.settled().await?;
//! assert!(config.satisfies_default_invariant());
//! window.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod notifier;
pub mod reconciler;
pub mod runtime;
pub mod store;

// Re-exports for convenience
pub use cache::{CacheState, CacheStats, CacheView, ProfileCache};
pub use config::SyncConfig;
pub use error::{ConfigError, StoreError, SyncError, SyncResult};
pub use facade::{MutationKind, ProfileFacade};
pub use notifier::{Notifier, ProcessId, Signal, SignalBus, SignalHandler, Subscription, Topic};
pub use reconciler::{plan_correction, Correction, ReconcileOutcome, Reconciler, ReconcilerStats};
pub use runtime::ProfileSync;
pub use store::{FileProfileStore, MemoryProfileStore, RemoteProfileStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with profile synchronization
    pub use crate::{
        CacheState, MemoryProfileStore, Notifier, ProfileCache, ProfileFacade, ProfileSync,
        ReconcileOutcome, Reconciler, RemoteProfileStore, Signal, SignalBus, SyncConfig,
        SyncError, Topic,
    };
    pub use psync_model::{
        default_profile, ProfileConfig, ProfileId, ProfileItem, ProfilePatch, DEFAULT_PROFILE_ID,
    };
}
