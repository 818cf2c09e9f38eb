use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::{is_group_member, Forum, User};

/// Moderation capabilities checked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Lock, pin, move and solve any topic.
    ChangeTopic,
    /// Edit, hide, unhide and mark useful any post. Also covers the alert queue.
    ChangePost,
}

impl Capability {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangeTopic => "forum.change_topic",
            Self::ChangePost => "forum.change_post",
        }
    }
}

/// Resolves what a user may see and do.
///
/// `user` is `None` for anonymous visitors. Implementations may hit storage,
/// so both checks are async and fallible.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Whether `user` may read topics of `forum`.
    async fn can_read(&self, user: Option<&User>, forum: &Forum) -> Result<bool>;

    /// Whether `user` holds a moderation capability.
    async fn has_permission(&self, user: &User, capability: Capability) -> Result<bool>;
}

/// Default provider backed by the forum tables.
///
/// A forum without a group is public. A forum bound to a group is readable
/// by its members and by staff. Staff hold every capability.
#[derive(Debug, Clone)]
pub struct DbPermissions {
    pool: SqlitePool,
}

impl DbPermissions {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionProvider for DbPermissions {
    async fn can_read(&self, user: Option<&User>, forum: &Forum) -> Result<bool> {
        let Some(group_id) = forum.group_id else {
            return Ok(true);
        };
        match user {
            None => Ok(false),
            Some(user) if user.is_staff => Ok(true),
            Some(user) => is_group_member(&self.pool, group_id, user.id).await,
        }
    }

    async fn has_permission(&self, user: &User, _capability: Capability) -> Result<bool> {
        Ok(user.is_staff)
    }
}
