//! Bundled default profile
//!
//! A zero-configuration remote profile shipped with the client. Its id is a
//! fixed sentinel: reconciliation identifies "the default" by id alone and
//! keeps exactly one copy of it at the end of the list.

use crate::profile::{ProfileId, ProfileItem, ProfileKind, ProfilePatch, ProfilePolicy};

/// Sentinel id of the bundled default profile
pub const DEFAULT_PROFILE_ID: &str = "z8e7d6c5-b4a3-2019-8765-4321fedcba98";

/// Revision of the bundled descriptor; bump when url, name or policy change
pub const DEFAULT_PROFILE_REVISION: u32 = 1;

const DEFAULT_PROFILE_NAME: &str = "Free optimized IP (availability not guaranteed)";

const DEFAULT_PROFILE_URL: &str = "https://url.v1.mk/sub?target=clash&url=https%3A%2F%2Ffree.jzy88.top%2F60156344-dbc3-4614-8177-fd337539a473%2Fsub&insert=false&config=https%3A%2F%2Fraw.githubusercontent.com%2FbyJoey%2Ftest%2Frefs%2Fheads%2Fmain%2Ftist.ini&emoji=true&list=false&xudp=false&udp=false&tfo=false&expand=true&scv=false&fdn=false&new_name=true";

const DEFAULT_REFRESH_MINUTES: u32 = 20;

/// Descriptor of the default profile, in the partial form stores accept
#[must_use]
pub fn default_profile() -> ProfilePatch {
    ProfilePatch {
        id: Some(ProfileId::from(DEFAULT_PROFILE_ID)),
        kind: Some(ProfileKind::Remote),
        name: Some(DEFAULT_PROFILE_NAME.to_string()),
        source_url: Some(DEFAULT_PROFILE_URL.to_string()),
        verify_tls: Some(false),
        refresh_interval_minutes: Some(DEFAULT_REFRESH_MINUTES),
        use_upstream_proxy: Some(false),
        client_fingerprint: None,
        auto_update: Some(true),
        locked: Some(true),
    }
}

/// Default profile as a full item, stamped with `now`
#[must_use]
pub fn default_profile_item(now: i64) -> ProfileItem {
    ProfileItem {
        id: ProfileId::from(DEFAULT_PROFILE_ID),
        kind: ProfileKind::Remote,
        name: DEFAULT_PROFILE_NAME.to_string(),
        source_url: Some(DEFAULT_PROFILE_URL.to_string()),
        policy: ProfilePolicy {
            verify_tls: false,
            refresh_interval_minutes: DEFAULT_REFRESH_MINUTES,
            use_upstream_proxy: false,
            client_fingerprint: None,
            auto_update: true,
            locked: true,
        },
        updated: Some(now),
    }
}

/// Whether `id` is the default profile's sentinel
#[inline]
#[must_use]
pub fn is_default_profile(id: &ProfileId) -> bool {
    id.as_str() == DEFAULT_PROFILE_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_locked_remote() {
        let item = default_profile_item(3);
        assert!(is_default_profile(&item.id));
        assert_eq!(item.kind, ProfileKind::Remote);
        assert!(item.is_locked());
        assert!(item.policy.auto_update);
        assert!(!item.policy.verify_tls);
        assert_eq!(item.policy.refresh_interval_minutes, 20);
        assert_eq!(item.updated, Some(3));
    }

    #[test]
    fn patch_and_item_agree() {
        let from_patch = ProfileItem::from_patch(default_profile(), 3).unwrap();
        assert_eq!(from_patch, default_profile_item(3));
    }
}
