//! Profile data model
//!
//! Types shared by every participant that reads or writes the profile list:
//!
//! - [`ProfileItem`]: one configuration source (remote URL or local file)
//! - [`ProfilePatch`]: partial item used for inserts and merges
//! - [`ProfileConfig`]: the ordered item list plus the active selection
//! - [`default_profile`]: the bundled zero-configuration profile that must
//!   always be present and last
//!
//! # Example
//!
//! ```rust
//! use psync_model::{default_profile, ProfileConfig, ProfilePatch};
//!
//! let mut config = ProfileConfig::default();
//! config.insert(ProfilePatch::remote("https://example.com/sub"), 0).unwrap();
//! config.insert(default_profile(), 0).unwrap();
//!
//! assert!(config.satisfies_default_invariant());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod default_profile;
pub mod error;
pub mod profile;
pub mod profile_config;

pub use default_profile::{
    default_profile, default_profile_item, is_default_profile, DEFAULT_PROFILE_ID,
    DEFAULT_PROFILE_REVISION,
};
pub use error::ProfileError;
pub use profile::{ClientFingerprint, ProfileId, ProfileItem, ProfileKind, ProfilePatch, ProfilePolicy};
pub use profile_config::{Placement, ProfileConfig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
