//! Synchronization settings

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-process synchronization configuration
///
/// Loaded from TOML; every key is optional:
///
/// ```toml
/// ensure_default_profile = true
/// ignore_own_signals = true
/// snapshot_capacity = 4
/// settle_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the default-profile reconciler
    pub ensure_default_profile: bool,
    /// Skip cache refreshes triggered by this process's own change signals
    pub ignore_own_signals: bool,
    /// Snapshots retained by the load coalescer
    pub snapshot_capacity: u64,
    /// Upper bound for [`crate::ProfileSync::settled`]
    pub settle_timeout_ms: u64,
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With reconciler enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_default_profile(mut self, enabled: bool) -> Self {
        self.ensure_default_profile = enabled;
        self
    }

    /// With own-signal filtering
    #[inline]
    #[must_use]
    pub fn with_ignore_own_signals(mut self, ignore: bool) -> Self {
        self.ignore_own_signals = ignore;
        self
    }

    /// With settle timeout
    #[inline]
    #[must_use]
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Settle timeout as a duration
    #[inline]
    #[must_use]
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML or unknown value types
    /// - `ConfigError::Invalid` on out-of-range values
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - see [`SyncConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), ?config, "loaded sync config");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_capacity == 0 {
            return Err(ConfigError::Invalid("snapshot_capacity must be at least 1".into()));
        }
        if self.settle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("settle_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ensure_default_profile: true,
            ignore_own_signals: true,
            snapshot_capacity: 4,
            settle_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(SyncConfig::from_toml_str("").unwrap(), SyncConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = SyncConfig::from_toml_str(
            "ensure_default_profile = false\nsettle_timeout_ms = 250\n",
        )
        .unwrap();
        assert!(!config.ensure_default_profile);
        assert!(config.ignore_own_signals);
        assert_eq!(config.settle_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = SyncConfig::from_toml_str("snapshot_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn wrong_type_is_parse_error() {
        let err = SyncConfig::from_toml_str("ignore_own_signals = \"yes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "ignore_own_signals = false\n").unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert!(!config.ignore_own_signals);

        let missing = SyncConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn builders() {
        let config = SyncConfig::new()
            .with_default_profile(false)
            .with_ignore_own_signals(false)
            .with_settle_timeout(Duration::from_secs(2));
        assert_eq!(config.settle_timeout_ms, 2_000);
        assert!(!config.ensure_default_profile);
    }
}
