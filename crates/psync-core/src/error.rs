//! Error types for profile synchronization
//!
//! Provides error handling for:
//! - Remote store calls (network/store failures, rejected mutations)
//! - Configuration loading
//! - Runtime lifecycle (start/shutdown/stabilization)

use crate::facade::MutationKind;
use psync_model::ProfileError;
use std::path::PathBuf;

/// Errors raised by a profile store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store rejected the mutation
    #[error("profile rejected: {0}")]
    Profile(#[from] ProfileError),

    /// IO error on the backing file
    #[error("io error on {path}: {source}")]
    Io {
        /// Backing file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Backing file does not hold a profile config
    #[error("malformed profile file {path}: {source}")]
    Malformed {
        /// Backing file
        path: PathBuf,
        /// JSON decoding error
        #[source]
        source: serde_json::Error,
    },

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Transport gave up waiting; the call may or may not have committed
    #[error("store call timed out")]
    Timeout,
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a later attempt may succeed without changing the request
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Unavailable(_) | Self::Timeout)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Config is not valid TOML for [`crate::SyncConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Main synchronization error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A facade mutation failed at the store
    #[error("{kind} failed: {source}")]
    Mutation {
        /// Operation that failed
        kind: MutationKind,
        /// Store error
        #[source]
        source: StoreError,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `start` called on a running instance
    #[error("profile sync already running")]
    AlreadyRunning,

    /// The snapshot did not stabilize in time
    #[error("profile config not stable after {waited_ms}ms")]
    Timeout {
        /// How long the caller waited
        waited_ms: u64,
    },
}

impl SyncError {
    /// Store error behind this failure, if any
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Mutation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            _ => self.store_error().is_some_and(StoreError::is_retryable),
        }
    }
}

/// Result type alias for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
