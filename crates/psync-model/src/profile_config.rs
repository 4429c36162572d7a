//! Profile list snapshot
//!
//! [`ProfileConfig`] is the aggregate persisted by the profile store: the
//! ordered item list plus the id of the active item. The mutation methods
//! here are the store-side semantics shared by every store implementation.

use crate::default_profile::DEFAULT_PROFILE_ID;
use crate::error::ProfileError;
use crate::profile::{ProfileId, ProfileItem, ProfilePatch};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered profile list plus active selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    /// Items in display order
    #[serde(default)]
    pub items: Vec<ProfileItem>,
    /// Active item, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_id: Option<ProfileId>,
}

/// Where a sentinel id sits in the item list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Not present
    Missing,
    /// Present once, at the last position
    Last,
    /// Present once, before the last position
    Misplaced {
        /// Current position
        index: usize,
    },
    /// Present more than once
    Duplicated {
        /// Number of occurrences
        count: usize,
    },
}

impl ProfileConfig {
    /// Create config from items with no active selection
    #[inline]
    #[must_use]
    pub fn new(items: Vec<ProfileItem>) -> Self {
        Self {
            items,
            current_id: None,
        }
    }

    /// Copy with a replaced item sequence, keeping the active selection
    #[must_use]
    pub fn with_items(&self, items: Vec<ProfileItem>) -> Self {
        Self {
            items,
            current_id: self.current_id.clone(),
        }
    }

    /// Number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Position of the first item with `id`
    #[must_use]
    pub fn position(&self, id: &ProfileId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    /// Whether an item with `id` exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &ProfileId) -> bool {
        self.position(id).is_some()
    }

    /// Item with `id`
    #[must_use]
    pub fn get(&self, id: &ProfileId) -> Option<&ProfileItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Active item; a dangling `current_id` resolves to `None`
    #[must_use]
    pub fn current_item(&self) -> Option<&ProfileItem> {
        self.current_id.as_ref().and_then(|id| self.get(id))
    }

    /// Ids in display order
    pub fn ids(&self) -> impl Iterator<Item = &ProfileId> {
        self.items.iter().map(|item| &item.id)
    }

    /// First id that occurs more than once
    #[must_use]
    pub fn first_duplicate(&self) -> Option<&ProfileId> {
        let mut seen = HashSet::with_capacity(self.items.len());
        self.ids().find(|id| !seen.insert(*id))
    }

    /// Placement of `id` in the item list
    #[must_use]
    pub fn placement_of(&self, id: &ProfileId) -> Placement {
        let mut count = 0;
        let mut index = 0;
        for (i, item) in self.items.iter().enumerate() {
            if &item.id == id {
                count += 1;
                index = i;
            }
        }

        match count {
            0 => Placement::Missing,
            1 if index + 1 == self.items.len() => Placement::Last,
            1 => Placement::Misplaced { index },
            count => Placement::Duplicated { count },
        }
    }

    /// Whether the bundled default profile is present exactly once and last
    #[must_use]
    pub fn satisfies_default_invariant(&self) -> bool {
        self.placement_of(&ProfileId::from(DEFAULT_PROFILE_ID)) == Placement::Last
    }

    /// Append a new item built from `patch`
    ///
    /// # Errors
    /// - `ProfileError::DuplicateId` if the id is taken
    /// - `ProfileError::MissingUrl` for a remote patch without url
    pub fn insert(&mut self, patch: ProfilePatch, now: i64) -> Result<ProfileId, ProfileError> {
        if let Some(id) = &patch.id {
            if self.contains(id) {
                return Err(ProfileError::DuplicateId(id.clone()));
            }
        }
        let item = ProfileItem::from_patch(patch, now)?;
        let id = item.id.clone();
        self.items.push(item);
        Ok(id)
    }

    /// Remove the item with `id`, clearing the selection if it was active
    ///
    /// # Errors
    /// - `ProfileError::NotFound` if no such item exists
    pub fn remove(&mut self, id: &ProfileId) -> Result<ProfileItem, ProfileError> {
        let index = self
            .position(id)
            .ok_or_else(|| ProfileError::NotFound(id.clone()))?;
        if self.current_id.as_ref() == Some(id) {
            self.current_id = None;
        }
        Ok(self.items.remove(index))
    }

    /// Merge `patch` into the item named by `patch.id`, in place
    ///
    /// # Errors
    /// - `ProfileError::MissingId` if the patch names no item
    /// - `ProfileError::NotFound` if the item does not exist
    /// - `ProfileError::MissingUrl` if the merge leaves a remote item without url
    pub fn update(&mut self, patch: &ProfilePatch, now: i64) -> Result<(), ProfileError> {
        let id = patch.id.as_ref().ok_or(ProfileError::MissingId)?;
        let item = self
            .items
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| ProfileError::NotFound(id.clone()))?;
        patch.merge_into(item, now)
    }

    /// Replace the whole snapshot
    ///
    /// # Errors
    /// - `ProfileError::DuplicateId` if `config` lists an id twice
    pub fn replace_all(&mut self, config: ProfileConfig) -> Result<(), ProfileError> {
        if let Some(id) = config.first_duplicate() {
            return Err(ProfileError::DuplicateId(id.clone()));
        }
        *self = config;
        Ok(())
    }

    /// Make `id` the active item
    ///
    /// # Errors
    /// - `ProfileError::NotFound` if no such item exists
    pub fn select(&mut self, id: &ProfileId) -> Result<(), ProfileError> {
        if !self.contains(id) {
            return Err(ProfileError::NotFound(id.clone()));
        }
        self.current_id = Some(id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_profile::default_profile;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn local(id: &str) -> ProfilePatch {
        ProfilePatch::local().with_id(id)
    }

    fn config_of(ids: &[&str]) -> ProfileConfig {
        let mut config = ProfileConfig::default();
        for id in ids {
            config.insert(local(id), 0).unwrap();
        }
        config
    }

    #[test]
    fn insert_appends_and_rejects_duplicates() {
        let mut config = config_of(&["a", "b"]);
        let ids: Vec<_> = config.ids().map(ProfileId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let err = config.insert(local("a"), 0).unwrap_err();
        assert_eq!(err, ProfileError::DuplicateId(ProfileId::from("a")));
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn insert_generates_missing_id() {
        let mut config = ProfileConfig::default();
        let id = config.insert(ProfilePatch::local(), 0).unwrap();
        assert!(config.contains(&id));
    }

    #[test]
    fn remove_clears_active_selection() {
        let mut config = config_of(&["a", "b"]);
        config.select(&ProfileId::from("a")).unwrap();

        let removed = config.remove(&ProfileId::from("a")).unwrap();
        assert_eq!(removed.id.as_str(), "a");
        assert!(config.current_id.is_none());
        assert!(config.remove(&ProfileId::from("a")).is_err());
    }

    #[test]
    fn update_keeps_position() {
        let mut config = config_of(&["a", "b", "c"]);
        config
            .update(&ProfilePatch::new().with_id("b").with_name("bee"), 9)
            .unwrap();

        assert_eq!(config.items[1].name, "bee");
        assert_eq!(config.position(&ProfileId::from("b")), Some(1));
        assert_eq!(config.update(&ProfilePatch::new(), 0), Err(ProfileError::MissingId));
    }

    #[test]
    fn dangling_selection_degrades_to_none() {
        let mut config = config_of(&["a"]);
        config.current_id = Some(ProfileId::from("gone"));
        assert!(config.current_item().is_none());

        assert!(config.select(&ProfileId::from("gone")).is_err());
        config.select(&ProfileId::from("a")).unwrap();
        assert_eq!(config.current_item().map(|i| i.id.as_str()), Some("a"));
    }

    #[test]
    fn replace_all_rejects_duplicate_ids() {
        let mut config = config_of(&["a"]);
        let mut dup = config_of(&["x"]);
        dup.items.push(dup.items[0].clone());

        assert!(config.replace_all(dup).is_err());
        assert_eq!(config, config_of(&["a"]));
    }

    #[test]
    fn placement_cases() {
        let sentinel = ProfileId::from("d");
        assert_eq!(config_of(&[]).placement_of(&sentinel), Placement::Missing);
        assert_eq!(config_of(&["a", "d"]).placement_of(&sentinel), Placement::Last);
        assert_eq!(
            config_of(&["a", "d", "b"]).placement_of(&sentinel),
            Placement::Misplaced { index: 1 }
        );

        let mut dup = config_of(&["d", "a"]);
        dup.items.push(dup.items[0].clone());
        assert_eq!(dup.placement_of(&sentinel), Placement::Duplicated { count: 2 });
    }

    #[test]
    fn default_invariant() {
        let mut config = config_of(&["a"]);
        assert!(!config.satisfies_default_invariant());
        config.insert(default_profile(), 0).unwrap();
        assert!(config.satisfies_default_invariant());
        config.insert(local("z"), 0).unwrap();
        assert!(!config.satisfies_default_invariant());
    }

    #[test]
    fn json_shape_uses_current_id() {
        let mut config = config_of(&["a"]);
        config.select(&ProfileId::from("a")).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["currentId"], "a");

        let empty: ProfileConfig = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
        assert!(empty.current_id.is_none());
    }

    proptest! {
        #[test]
        fn prop_insert_never_duplicates(ids in proptest::collection::vec("[a-d]", 0..20)) {
            let mut config = ProfileConfig::default();
            for id in &ids {
                let _ = config.insert(local(id), 0);
            }
            prop_assert!(config.first_duplicate().is_none());
        }
    }
}
