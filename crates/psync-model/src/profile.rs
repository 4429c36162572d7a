//! Profile entities
//!
//! Defines a single configuration source and its partial form:
//! - Profile identifiers
//! - Source kind (remote subscription or local file)
//! - Fetch/refresh policy flags
//! - Full items and partial patches

use crate::error::ProfileError;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque profile identifier, stable for the profile's lifetime
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    /// Wrap an existing identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier (lowercase ULID)
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProfileId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProfileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Where a profile's content comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// Fetched from `source_url`
    Remote,
    /// Supplied by the user
    Local,
}

impl ProfileKind {
    /// Display name given to items inserted without one
    #[must_use]
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Remote => "Remote File",
            Self::Local => "Local File",
        }
    }
}

/// TLS client fingerprint presented when fetching a remote profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum ClientFingerprint {
    Chrome,
    Firefox,
    Safari,
    Ios,
    Android,
    Edge,
    Qq,
    Random,
    #[serde(rename = "360")]
    ThreeSixty,
}

/// Fetch and refresh behaviour of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePolicy {
    /// Verify the TLS certificate of the source
    #[serde(rename = "verify")]
    pub verify_tls: bool,
    /// Refresh interval in minutes, 0 disables periodic refresh
    #[serde(rename = "interval")]
    pub refresh_interval_minutes: u32,
    /// Fetch through the running proxy
    #[serde(rename = "useProxy")]
    pub use_upstream_proxy: bool,
    /// TLS fingerprint, `None` uses the fetcher's default
    #[serde(rename = "fingerprint", skip_serializing_if = "Option::is_none")]
    pub client_fingerprint: Option<ClientFingerprint>,
    /// Refresh automatically on the interval
    #[serde(rename = "autoUpdate")]
    pub auto_update: bool,
    /// System managed; UI should not offer deletion
    pub locked: bool,
}

impl Default for ProfilePolicy {
    fn default() -> Self {
        Self {
            verify_tls: true,
            refresh_interval_minutes: 0,
            use_upstream_proxy: false,
            client_fingerprint: None,
            auto_update: false,
            locked: false,
        }
    }
}

/// One configuration source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileItem {
    /// Unique identifier
    pub id: ProfileId,
    /// Source kind
    #[serde(rename = "type")]
    pub kind: ProfileKind,
    /// Display label
    pub name: String,
    /// Subscription url, only for remote profiles
    #[serde(rename = "url", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Fetch/refresh options
    #[serde(flatten)]
    pub policy: ProfilePolicy,
    /// Epoch millis of the last store-side write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
}

impl ProfileItem {
    /// Materialize a full item from a patch, filling store-side defaults
    ///
    /// # Errors
    /// - `ProfileError::MissingUrl` if the result is a remote profile without url
    pub fn from_patch(patch: ProfilePatch, now: i64) -> Result<Self, ProfileError> {
        let id = patch.id.clone().unwrap_or_else(ProfileId::generate);
        let kind = patch.kind.unwrap_or(if patch.source_url.is_some() {
            ProfileKind::Remote
        } else {
            ProfileKind::Local
        });

        let mut item = Self {
            id,
            kind,
            name: kind.default_name().to_string(),
            source_url: None,
            policy: ProfilePolicy::default(),
            updated: None,
        };
        patch.merge_into(&mut item, now)?;
        Ok(item)
    }

    /// Whether this item is system managed
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.policy.locked
    }

    fn validate(&self) -> Result<(), ProfileError> {
        if self.kind == ProfileKind::Remote && self.source_url.is_none() {
            return Err(ProfileError::MissingUrl(self.id.clone()));
        }
        Ok(())
    }
}

/// Partial profile: only the fields a caller wants to set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProfileId>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProfileKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "url", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(rename = "verify", default, skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
    #[serde(rename = "interval", default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_minutes: Option<u32>,
    #[serde(rename = "useProxy", default, skip_serializing_if = "Option::is_none")]
    pub use_upstream_proxy: Option<bool>,
    #[serde(rename = "fingerprint", default, skip_serializing_if = "Option::is_none")]
    pub client_fingerprint: Option<ClientFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

impl ProfilePatch {
    /// Empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch for a remote profile
    #[must_use]
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            kind: Some(ProfileKind::Remote),
            source_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Patch for a local profile
    #[must_use]
    pub fn local() -> Self {
        Self {
            kind: Some(ProfileKind::Local),
            ..Self::default()
        }
    }

    /// Target a specific id
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ProfileId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// With refresh interval
    #[inline]
    #[must_use]
    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.refresh_interval_minutes = Some(minutes);
        self
    }

    /// With locked flag
    #[inline]
    #[must_use]
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    /// Merge the set fields into `item`, leaving it untouched on error
    ///
    /// Local profiles never carry a source url.
    ///
    /// # Errors
    /// - `ProfileError::MissingUrl` if the merge leaves a remote item without url
    pub fn merge_into(&self, item: &mut ProfileItem, now: i64) -> Result<(), ProfileError> {
        let mut next = item.clone();
        if let Some(kind) = self.kind {
            next.kind = kind;
        }
        if let Some(name) = &self.name {
            next.name.clone_from(name);
        }
        if let Some(url) = &self.source_url {
            next.source_url = Some(url.clone());
        }
        if next.kind == ProfileKind::Local {
            next.source_url = None;
        }

        let policy = &mut next.policy;
        if let Some(v) = self.verify_tls {
            policy.verify_tls = v;
        }
        if let Some(v) = self.refresh_interval_minutes {
            policy.refresh_interval_minutes = v;
        }
        if let Some(v) = self.use_upstream_proxy {
            policy.use_upstream_proxy = v;
        }
        if let Some(v) = self.client_fingerprint {
            policy.client_fingerprint = Some(v);
        }
        if let Some(v) = self.auto_update {
            policy.auto_update = v;
        }
        if let Some(v) = self.locked {
            policy.locked = v;
        }

        next.validate()?;
        next.updated = Some(now);
        *item = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn generated_ids_are_unique() {
        let a = ProfileId::generate();
        let b = ProfileId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), a.as_str().to_lowercase());
    }

    #[test]
    fn from_patch_infers_kind_and_name() {
        let item = ProfileItem::from_patch(ProfilePatch::new().with_id("r"), 7).unwrap();
        assert_eq!(item.kind, ProfileKind::Local);
        assert_eq!(item.name, "Local File");
        assert_eq!(item.updated, Some(7));

        let patch = ProfilePatch {
            source_url: Some("https://example.com".into()),
            ..ProfilePatch::default()
        };
        let item = ProfileItem::from_patch(patch, 0).unwrap();
        assert_eq!(item.kind, ProfileKind::Remote);
        assert_eq!(item.name, "Remote File");
    }

    #[test]
    fn remote_without_url_is_rejected() {
        let patch = ProfilePatch {
            kind: Some(ProfileKind::Remote),
            ..ProfilePatch::new().with_id("x")
        };
        let err = ProfileItem::from_patch(patch, 0).unwrap_err();
        assert_eq!(err, ProfileError::MissingUrl(ProfileId::from("x")));
    }

    #[test]
    fn local_drops_source_url() {
        let patch = ProfilePatch {
            source_url: Some("https://example.com".into()),
            ..ProfilePatch::local()
        };
        let item = ProfileItem::from_patch(patch, 0).unwrap();
        assert!(item.source_url.is_none());
    }

    #[test]
    fn merge_only_touches_set_fields() {
        let mut item = ProfileItem::from_patch(
            ProfilePatch::remote("https://a").with_id("a").with_interval(30),
            1,
        )
        .unwrap();

        ProfilePatch::new().with_name("renamed").merge_into(&mut item, 2).unwrap();

        assert_eq!(item.name, "renamed");
        assert_eq!(item.policy.refresh_interval_minutes, 30);
        assert_eq!(item.source_url.as_deref(), Some("https://a"));
        assert_eq!(item.updated, Some(2));
    }

    #[test]
    fn failed_merge_leaves_item_untouched() {
        let mut item = ProfileItem::from_patch(ProfilePatch::local().with_id("l"), 1).unwrap();
        let before = item.clone();

        let patch = ProfilePatch {
            kind: Some(ProfileKind::Remote),
            ..ProfilePatch::new()
        };
        assert!(patch.merge_into(&mut item, 2).is_err());
        assert_eq!(item, before);
    }

    #[test]
    fn item_json_shape() {
        let item = ProfileItem::from_patch(
            ProfilePatch::remote("https://a").with_id("a").with_locked(true),
            5,
        )
        .unwrap();
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["type"], "remote");
        assert_eq!(json["url"], "https://a");
        assert_eq!(json["useProxy"], false);
        assert_eq!(json["locked"], true);
        assert!(json.get("fingerprint").is_none());

        let back: ProfileItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn missing_policy_fields_take_defaults() {
        let item: ProfileItem =
            serde_json::from_str(r#"{"id":"l","type":"local","name":"mine"}"#).unwrap();
        assert_eq!(item.policy, ProfilePolicy::default());
    }

    #[test]
    fn fingerprint_wire_names() {
        let fp: ClientFingerprint = serde_json::from_str("\"360\"").unwrap();
        assert_eq!(fp, ClientFingerprint::ThreeSixty);
        assert_eq!(serde_json::to_string(&ClientFingerprint::Ios).unwrap(), "\"ios\"");
    }
}
