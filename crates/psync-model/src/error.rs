//! Error types for profile mutations

use crate::profile::ProfileId;

/// Errors raised when a mutation cannot be applied to a [`crate::ProfileConfig`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    /// An item with this id already exists
    #[error("duplicate profile id: {0}")]
    DuplicateId(ProfileId),

    /// No item with this id exists
    #[error("profile not found: {0}")]
    NotFound(ProfileId),

    /// An update was submitted without naming its target
    #[error("profile update is missing an id")]
    MissingId,

    /// A remote profile has no source url
    #[error("remote profile {0} has no source url")]
    MissingUrl(ProfileId),
}

impl ProfileError {
    /// Id the error refers to, if any
    #[must_use]
    pub fn profile_id(&self) -> Option<&ProfileId> {
        match self {
            Self::DuplicateId(id) | Self::NotFound(id) | Self::MissingUrl(id) => Some(id),
            Self::MissingId => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_error_display() {
        let err = ProfileError::NotFound(ProfileId::from("abc"));
        assert_eq!(err.to_string(), "profile not found: abc");
        assert_eq!(err.profile_id().map(ProfileId::as_str), Some("abc"));
        assert!(ProfileError::MissingId.profile_id().is_none());
    }
}
