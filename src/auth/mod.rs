//! Read and moderation permission checks.

mod permissions;

pub use permissions::{Capability, DbPermissions, PermissionProvider};
